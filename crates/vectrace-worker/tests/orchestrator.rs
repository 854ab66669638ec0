//! Integration tests: drive an orchestrator through its public API with a
//! fake model whose loading can be held open.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::path::Path;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, bounded};
use image::{GrayImage, Luma};
use vectrace_pipeline::{MaskQuality, RawMaskRecord, RgbImage};
use vectrace_worker::{
    EventKind, ExportRequest, ModelLoader, OracleError, Orchestrator, OrchestratorError,
    SegmentationOracle, SegmentationParams, TaskEvent, TaskKind, TaskOutput, WorkerState,
};

const WAIT: Duration = Duration::from_secs(10);

/// Answers every image with one centered square covering half of each side.
struct Square;

impl SegmentationOracle for Square {
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<RawMaskRecord>, OracleError> {
        let (w, h) = image.dimensions();
        let grid = GrayImage::from_fn(w, h, |x, y| {
            let inside = (w / 4..w * 3 / 4).contains(&x) && (h / 4..h * 3 / 4).contains(&y);
            Luma([if inside { 255 } else { 0 }])
        });
        Ok(vec![RawMaskRecord::from_luma(
            &grid,
            MaskQuality {
                predicted_iou: Some(0.95),
                stability_score: Some(0.97),
            },
        )])
    }
}

/// `Square`, but each inference waits for the test to open its gate.
struct GatedSquare {
    gate: Receiver<()>,
}

impl SegmentationOracle for GatedSquare {
    fn generate(&mut self, image: &RgbImage) -> Result<Vec<RawMaskRecord>, OracleError> {
        self.gate
            .recv_timeout(WAIT)
            .map_err(|e| OracleError::Inference(e.to_string()))?;
        Square.generate(image)
    }
}

/// Blocks in `check_file` until the test opens the gate. With an
/// `oracle_gate`, the generator it builds blocks too.
struct GatedLoader {
    gate: Receiver<()>,
    oracle_gate: Option<Receiver<()>>,
}

impl ModelLoader for GatedLoader {
    fn check_file(&mut self, path: &Path) -> Result<(), OracleError> {
        self.gate
            .recv_timeout(WAIT)
            .map_err(|e| OracleError::Io(std::io::Error::other(e)))?;
        if path.as_os_str().is_empty() {
            return Err(OracleError::MissingArtifact {
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    fn check_dependencies(&mut self) -> Result<(), OracleError> {
        Ok(())
    }

    fn construct(&mut self, _: &Path) -> Result<(), OracleError> {
        Ok(())
    }

    fn transfer_to_device(&mut self) -> Result<String, OracleError> {
        Ok("cpu".into())
    }

    fn build_generator(
        &mut self,
        _: &SegmentationParams,
    ) -> Result<Box<dyn SegmentationOracle>, OracleError> {
        Ok(match self.oracle_gate.take() {
            Some(gate) => Box::new(GatedSquare { gate }),
            None => Box::new(Square),
        })
    }
}

fn orchestrator() -> (Orchestrator, Sender<()>) {
    let (gate, rx) = bounded(4);
    let orch = Orchestrator::new(GatedLoader {
        gate: rx,
        oracle_gate: None,
    })
    .unwrap();
    (orch, gate)
}

/// Collect one task run's events, up to and including the terminal one.
fn run_events(rx: &Receiver<TaskEvent>) -> Vec<TaskEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx.recv_timeout(WAIT).expect("task should end");
        let done = event.kind.is_terminal();
        events.push(event);
        if done {
            return events;
        }
    }
}

fn load(orch: &Orchestrator, gate: &Sender<()>, rx: &Receiver<TaskEvent>) -> Vec<TaskEvent> {
    orch.load_model("model.bin", SegmentationParams::default()).unwrap();
    gate.send(()).unwrap();
    run_events(rx)
}

fn assert_well_formed(events: &[TaskEvent]) {
    assert!(matches!(events.first().unwrap().kind, EventKind::Started));
    assert!(events.last().unwrap().kind.is_terminal());
    let task = events[0].task;
    assert!(events.iter().all(|e| e.task == task));
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
    assert!(percents.iter().all(|&p| p <= 100));
}

#[test]
fn load_segment_export() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    assert_eq!(orch.state(), WorkerState::Idle);

    let events = load(&orch, &gate, &rx);
    assert_well_formed(&events);
    let percents: Vec<u8> = events
        .iter()
        .filter_map(|e| match e.kind {
            EventKind::Progress { percent, .. } => Some(percent),
            _ => None,
        })
        .collect();
    assert_eq!(percents, vec![10, 30, 40, 70, 90, 100]);
    let EventKind::Finished(TaskOutput::ModelLoaded { device }) = &events.last().unwrap().kind
    else {
        panic!("expected a loaded model, got {events:?}");
    };
    assert_eq!(device, "cpu");
    assert_eq!(orch.state(), WorkerState::Ready);
    assert!(orch.has_model());

    orch.segment(RgbImage::new(160, 120)).unwrap();
    let events = run_events(&rx);
    assert_well_formed(&events);
    let EventKind::Finished(TaskOutput::Masks { masks, resized, .. }) =
        events.last().unwrap().kind.clone()
    else {
        panic!("expected masks, got {events:?}");
    };
    assert_eq!(masks.len(), 1);
    assert_eq!(orch.state(), WorkerState::Ready);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("square.dxf");
    let mut request = ExportRequest::new(masks, &path);
    request.source_height = Some(resized.height);
    orch.export(request).unwrap();
    assert_eq!(orch.active_task(), Some(TaskKind::Export));
    let events = run_events(&rx);
    assert_well_formed(&events);
    let EventKind::Finished(TaskOutput::Exported { stats, .. }) = &events.last().unwrap().kind
    else {
        panic!("expected a drawing, got {events:?}");
    };
    assert_eq!(stats.polylines, 1);
    assert!(path.exists());
    assert_eq!(orch.state(), WorkerState::Ready, "the model is still held");

    orch.shutdown();
}

#[test]
fn second_request_is_rejected_while_loading() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    orch.load_model("model.bin", SegmentationParams::default()).unwrap();
    assert_eq!(orch.state(), WorkerState::Loading);

    let again = orch.load_model("other.bin", SegmentationParams::default());
    assert!(matches!(
        again,
        Err(OrchestratorError::Busy {
            state: WorkerState::Loading
        })
    ));
    let export = orch.export(ExportRequest::new(Vec::new(), "unused.dxf"));
    assert!(matches!(export, Err(OrchestratorError::Busy { .. })));
    assert!(matches!(orch.unload(), Err(OrchestratorError::Busy { .. })));

    gate.send(()).unwrap();
    let events = run_events(&rx);
    assert!(matches!(
        events.last().unwrap().kind,
        EventKind::Finished(_)
    ));
    assert_eq!(orch.state(), WorkerState::Ready);
}

#[test]
fn second_request_is_rejected_while_running() {
    let (gate, load_rx) = bounded(4);
    let (inference, inference_rx) = bounded(4);
    let orch = Orchestrator::new(GatedLoader {
        gate: load_rx,
        oracle_gate: Some(inference_rx),
    })
    .unwrap();
    let rx = orch.subscribe();
    load(&orch, &gate, &rx);
    assert_eq!(orch.state(), WorkerState::Ready);

    orch.segment(RgbImage::new(64, 64)).unwrap();
    assert_eq!(orch.state(), WorkerState::Running);
    assert_eq!(orch.active_task(), Some(TaskKind::Segment));

    let again = orch.segment(RgbImage::new(64, 64));
    assert!(matches!(
        again,
        Err(OrchestratorError::Busy {
            state: WorkerState::Running
        })
    ));
    let reload = orch.load_model("other.bin", SegmentationParams::default());
    assert!(matches!(reload, Err(OrchestratorError::Busy { .. })));
    let export = orch.export(ExportRequest::new(Vec::new(), "unused.dxf"));
    assert!(matches!(export, Err(OrchestratorError::Busy { .. })));

    inference.send(()).unwrap();
    let events = run_events(&rx);
    assert_well_formed(&events);
    assert!(matches!(
        events.last().unwrap().kind,
        EventKind::Finished(TaskOutput::Masks { .. })
    ));
    assert_eq!(orch.state(), WorkerState::Ready);
    orch.shutdown();
}

#[test]
fn cancel_during_load_lands_idle() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    orch.load_model("model.bin", SegmentationParams::default()).unwrap();

    // The first stage is reported before the loader blocks on the gate.
    let started = rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(started.kind, EventKind::Started));
    let first = rx.recv_timeout(WAIT).unwrap();
    assert!(matches!(first.kind, EventKind::Progress { percent: 10, .. }));

    orch.cancel().unwrap();
    assert_eq!(orch.state(), WorkerState::Cancelling);
    assert!(matches!(orch.segment(RgbImage::new(4, 4)), Err(OrchestratorError::Busy { .. })));
    gate.send(()).unwrap();

    let rest = run_events(&rx);
    assert_eq!(rest.len(), 1, "no further progress after the stop: {rest:?}");
    let EventKind::Failed { message, .. } = &rest[0].kind else {
        panic!("expected a failure, got {rest:?}");
    };
    assert_eq!(message, "cancelled");
    assert_eq!(orch.state(), WorkerState::Idle);
    assert!(!orch.has_model());
}

#[test]
fn cancel_after_load_releases_the_model() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    load(&orch, &gate, &rx);
    assert!(orch.has_model());

    // Nothing is active, so there is nothing to cancel.
    assert!(matches!(
        orch.cancel(),
        Err(OrchestratorError::InvalidState {
            state: WorkerState::Ready,
            requested: "cancel"
        })
    ));

    // A reload parks on the gate; cancel it.
    orch.load_model("model.bin", SegmentationParams::default()).unwrap();
    orch.cancel().unwrap();
    gate.send(()).unwrap();
    let events = run_events(&rx);
    assert!(matches!(
        &events.last().unwrap().kind,
        EventKind::Failed { message, .. } if message == "cancelled"
    ));
    assert_eq!(orch.state(), WorkerState::Idle);
    assert!(!orch.has_model());
}

#[test]
fn segment_needs_a_model() {
    let (orch, _gate) = orchestrator();
    assert!(matches!(
        orch.segment(RgbImage::new(8, 8)),
        Err(OrchestratorError::InvalidState {
            state: WorkerState::Idle,
            requested: "segment"
        })
    ));
    assert!(matches!(
        orch.unload(),
        Err(OrchestratorError::InvalidState { .. })
    ));
}

#[test]
fn unload_returns_to_idle() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    load(&orch, &gate, &rx);
    assert_eq!(orch.state(), WorkerState::Ready);

    orch.unload().unwrap();
    assert_eq!(orch.state(), WorkerState::Idle);
    assert!(!orch.has_model());
    assert!(orch.segment(RgbImage::new(8, 8)).is_err());
}

#[test]
fn failed_load_reports_error_and_allows_retry() {
    let (orch, gate) = orchestrator();
    let rx = orch.subscribe();
    orch.load_model("", SegmentationParams::default()).unwrap();
    gate.send(()).unwrap();
    let events = run_events(&rx);
    let EventKind::Failed { message, detail } = &events.last().unwrap().kind else {
        panic!("expected a failure, got {events:?}");
    };
    assert_eq!(message, "model file is missing or unreadable");
    assert!(detail.starts_with("model artifact not found"));
    assert_ne!(message, detail);
    assert_eq!(orch.state(), WorkerState::Error);

    let events = load(&orch, &gate, &rx);
    assert!(matches!(events.last().unwrap().kind, EventKind::Finished(_)));
    assert_eq!(orch.state(), WorkerState::Ready);
}

#[test]
fn export_without_model_ends_idle() {
    let (orch, _gate) = orchestrator();
    let rx = orch.subscribe();
    let dir = tempfile::tempdir().unwrap();

    let grid = GrayImage::from_fn(50, 50, |x, y| {
        Luma([if (5..45).contains(&x) && (5..45).contains(&y) { 255 } else { 0 }])
    });
    let mask = vectrace_pipeline::RawMask::from_luma(&grid, MaskQuality::default());
    orch.export(ExportRequest::new(vec![mask], dir.path().join("a.dxf"))).unwrap();
    let events = run_events(&rx);
    assert_well_formed(&events);
    assert!(matches!(events.last().unwrap().kind, EventKind::Finished(_)));
    assert_eq!(orch.state(), WorkerState::Idle);
}

#[test]
fn every_listener_sees_every_event() {
    let (orch, gate) = orchestrator();
    let a = orch.subscribe();
    let b = orch.subscribe();
    let from_a = load(&orch, &gate, &a);
    let from_b = run_events(&b);
    assert_eq!(from_a.len(), from_b.len());
    assert_eq!(from_a.len(), 8, "started, six progress events, finished");
}
