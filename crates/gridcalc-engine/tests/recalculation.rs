//! Recalculation passes driven by asynchronous evaluators

use async_trait::async_trait;
use gridcalc_engine::{
    extract_references, AbortHandle, CalcEngine, CalcError, CellAddress, CellContent, CellError,
    CellEvaluator, CellRange, CellStore, CellValue, EvalError, Evaluation,
};
use pretty_assertions::assert_eq;
use std::sync::Mutex;
use std::time::Duration;

fn addr(s: &str) -> CellAddress {
    CellAddress::parse(s).unwrap()
}

/// Sums referenced cells, yielding to the runtime before every answer and
/// recording the order in which cells were evaluated.
#[derive(Default)]
struct YieldingSum {
    visited: Mutex<Vec<CellAddress>>,
}

impl YieldingSum {
    fn visited(&self) -> Vec<String> {
        self.visited
            .lock()
            .unwrap()
            .iter()
            .map(|a| a.to_string())
            .collect()
    }
}

#[async_trait]
impl CellEvaluator for YieldingSum {
    async fn evaluate(
        &self,
        address: CellAddress,
        content: &CellContent,
        cells: &CellStore,
    ) -> Result<Evaluation, EvalError> {
        tokio::task::yield_now().await;
        self.visited.lock().unwrap().push(address);

        let formula = content.formula.as_deref().unwrap_or_default();
        let mut total = 0.0;
        for reference in extract_references(formula) {
            match cells.value(reference) {
                CellValue::Error(e) => return Ok(Evaluation::error(e, "error in input")),
                value => total += value.as_number().unwrap_or(0.0),
            }
        }
        Ok(Evaluation::value(total))
    }
}

/// Aborts the pass from inside the evaluator once it reaches `trigger`
struct AbortAt {
    trigger: CellAddress,
    handle: AbortHandle,
}

#[async_trait]
impl CellEvaluator for AbortAt {
    async fn evaluate(
        &self,
        address: CellAddress,
        _content: &CellContent,
        _cells: &CellStore,
    ) -> Result<Evaluation, EvalError> {
        tokio::task::yield_now().await;
        if address == self.trigger {
            self.handle.abort();
        }
        Ok(Evaluation::value(1.0))
    }
}

/// Never answers
struct Hang;

#[async_trait]
impl CellEvaluator for Hang {
    async fn evaluate(
        &self,
        _address: CellAddress,
        _content: &CellContent,
        _cells: &CellStore,
    ) -> Result<Evaluation, EvalError> {
        std::future::pending().await
    }
}

/// Produces a 2×2 block of distinct values anchored at the cell
struct Block;

#[async_trait]
impl CellEvaluator for Block {
    async fn evaluate(
        &self,
        address: CellAddress,
        _content: &CellContent,
        _cells: &CellStore,
    ) -> Result<Evaluation, EvalError> {
        let end = address.offset(1, 1).ok_or("no room to spill")?;
        Ok(Evaluation::value(1.0).with_spill_values(
            CellRange::new(address, end),
            vec![
                vec![CellValue::Number(1.0), CellValue::Number(2.0)],
                vec![CellValue::Number(3.0), CellValue::Number(4.0)],
            ],
        ))
    }
}

#[tokio::test]
async fn test_basic_chain_scenario() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.register_cell(addr("A1"), vec![]);
    engine.register_cell(addr("B1"), vec![addr("A1")]);
    engine.register_cell(addr("C1"), vec![addr("B1")]);
    cells.set_raw(addr("A1"), "5");
    cells.set_raw(addr("B1"), "=A1");
    cells.set_raw(addr("C1"), "=B1");

    let evaluator = YieldingSum::default();
    let stats = engine.recalculate(&mut cells, &evaluator).await.unwrap();

    assert_eq!(stats.calculated_cells, 2);
    assert_eq!(cells.value(addr("B1")).to_string(), "5");
    assert_eq!(cells.value(addr("C1")).to_string(), "5");
}

#[tokio::test]
async fn test_evaluation_follows_dependency_order() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    // Entered bottom-up and in reverse address order on purpose
    engine.set_cell(&mut cells, addr("A3"), "=A2");
    engine.set_cell(&mut cells, addr("A2"), "=A1");
    engine.set_cell(&mut cells, addr("A1"), "=1");
    engine.recalculate(&mut cells, &YieldingSum::default()).await.unwrap();

    engine.set_cell(&mut cells, addr("A1"), "=2");
    let evaluator = YieldingSum::default();
    let stats = engine.recalculate(&mut cells, &evaluator).await.unwrap();

    assert_eq!(evaluator.visited(), vec!["A1", "A2", "A3"]);
    assert_eq!(stats.calculated_cells, 3);
    assert_eq!(cells.value(addr("A3")), CellValue::Number(0.0));
}

#[tokio::test]
async fn test_reference_values_flow_through_chain() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "1");
    engine.set_cell(&mut cells, addr("A2"), "2");
    engine.set_cell(&mut cells, addr("A3"), "3");
    engine.set_cell(&mut cells, addr("B1"), "=SUM(A1:A3)");
    engine.set_cell(&mut cells, addr("C1"), "=B1+A1");

    engine.recalculate(&mut cells, &YieldingSum::default()).await.unwrap();
    assert_eq!(cells.value(addr("B1")), CellValue::Number(6.0));
    assert_eq!(cells.value(addr("C1")), CellValue::Number(7.0));

    engine.set_cell(&mut cells, addr("A2"), "10");
    let evaluator = YieldingSum::default();
    engine.recalculate(&mut cells, &evaluator).await.unwrap();

    assert_eq!(evaluator.visited(), vec!["B1", "C1"]);
    assert_eq!(cells.value(addr("C1")), CellValue::Number(15.0));
}

#[tokio::test]
async fn test_cycle_scenario() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.register_cell(addr("A1"), vec![addr("B1")]);
    engine.register_cell(addr("B1"), vec![addr("A1")]);
    cells.set_raw(addr("A1"), "=B1");
    cells.set_raw(addr("B1"), "=A1");

    let evaluator = YieldingSum::default();
    let stats = engine.recalculate(&mut cells, &evaluator).await.unwrap();

    assert_eq!(stats.circular_references, vec!["A1 → B1 → A1"]);
    assert_eq!(stats.calculated_cells, 0);
    assert!(evaluator.visited().is_empty());

    let a1 = cells.get(addr("A1")).unwrap();
    assert_eq!(a1.value, CellValue::Error(CellError::Circular));
    assert_eq!(a1.error.as_deref(), Some("Circular reference"));
}

#[tokio::test]
async fn test_three_cell_cycle_reported() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "=B1");
    engine.set_cell(&mut cells, addr("B1"), "=C1");
    engine.set_cell(&mut cells, addr("C1"), "=A1");

    let stats = engine.recalculate(&mut cells, &YieldingSum::default()).await.unwrap();

    assert_eq!(stats.circular_references, vec!["A1 → B1 → C1 → A1"]);
    for cell in ["A1", "B1", "C1"] {
        assert_eq!(cells.value(addr(cell)), CellValue::Error(CellError::Circular));
    }
}

#[tokio::test]
async fn test_abort_from_evaluator_keeps_finished_cells() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    for cell in ["A1", "A2", "A3", "A4"] {
        engine.set_cell(&mut cells, addr(cell), "=0");
    }

    let evaluator = AbortAt {
        trigger: addr("A2"),
        handle: engine.abort_handle(),
    };
    let err = engine.recalculate(&mut cells, &evaluator).await.unwrap_err();

    assert_eq!(err, CalcError::Aborted { calculated: 2 });
    assert_eq!(cells.value(addr("A1")), CellValue::Number(1.0));
    assert_eq!(cells.value(addr("A2")), CellValue::Number(1.0));
    assert_eq!(cells.value(addr("A3")), CellValue::Empty);
    assert!(engine.is_dirty(addr("A3")));
    assert!(!engine.dirty_cells().is_empty());
}

#[tokio::test]
async fn test_runaway_guard() {
    let mut engine = CalcEngine::with_max_iterations(3);
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "1");
    for row in 2..=6 {
        let cell = CellAddress::new(row - 1, 0);
        let above = CellAddress::new(row - 2, 0);
        engine.set_cell(&mut cells, cell, &format!("={}", above));
    }

    let err = engine
        .recalculate(&mut cells, &YieldingSum::default())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        CalcError::IterationLimit {
            limit: 3,
            calculated: 3
        }
    );
    for cell in ["A2", "A3", "A4"] {
        assert_eq!(cells.value(addr(cell)), CellValue::Number(1.0));
    }
    assert_eq!(cells.value(addr("A5")), CellValue::Empty);
}

#[tokio::test]
async fn test_spill_consistency() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("C3"), "=BLOCK()");

    let stats = engine.recalculate(&mut cells, &Block).await.unwrap();
    assert_eq!(stats.calculated_cells, 1);

    let spilled: Vec<(String, CellValue)> = cells
        .iter()
        .filter(|(_, c)| c.spill_origin == Some(addr("C3")))
        .map(|(a, c)| (a.to_string(), c.value.clone()))
        .collect();

    assert_eq!(
        spilled,
        vec![
            ("C3".to_string(), CellValue::Number(1.0)),
            ("D3".to_string(), CellValue::Number(2.0)),
            ("C4".to_string(), CellValue::Number(3.0)),
            ("D4".to_string(), CellValue::Number(4.0)),
        ]
    );
}

#[tokio::test]
async fn test_error_inputs_propagate_without_failing_pass() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "#DIV/0!");
    engine.set_cell(&mut cells, addr("B1"), "=A1");
    engine.set_cell(&mut cells, addr("C1"), "=2");

    let stats = engine.recalculate(&mut cells, &YieldingSum::default()).await.unwrap();

    assert_eq!(stats.calculated_cells, 2);
    assert_eq!(stats.errors, 0);
    assert_eq!(cells.value(addr("B1")), CellValue::Error(CellError::Div0));
    assert_eq!(cells.value(addr("C1")), CellValue::Number(0.0));
}

#[tokio::test]
async fn test_removed_cell_leaves_graph_consistent() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "1");
    engine.set_cell(&mut cells, addr("B1"), "=A1");
    engine.recalculate(&mut cells, &YieldingSum::default()).await.unwrap();

    engine.remove_cell(addr("A1"));

    assert!(engine.node(addr("A1")).is_none());
    assert!(engine.get_dependencies(addr("B1")).is_empty());
    assert_eq!(engine.len(), 1);
}

#[tokio::test]
async fn test_timed_out_pass_can_be_retried() {
    let mut engine = CalcEngine::default();
    let mut cells = CellStore::new();
    engine.set_cell(&mut cells, addr("A1"), "1");
    engine.set_cell(&mut cells, addr("B1"), "=A1");

    let timed_out = tokio::time::timeout(
        Duration::from_millis(10),
        engine.recalculate(&mut cells, &Hang),
    )
    .await;
    assert!(timed_out.is_err());
    assert!(!engine.node(addr("B1")).unwrap().is_calculating());
    assert!(engine.is_dirty(addr("B1")));

    let stats = engine
        .recalculate(&mut cells, &YieldingSum::default())
        .await
        .unwrap();
    assert_eq!(stats.calculated_cells, 1);
    assert_eq!(cells.value(addr("B1")), CellValue::Number(1.0));
}
