mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use viz_marshal::{
    CreateParams, EngineError, Image, ImageDataType, ImageFormat, Primitive, Rgba, ScriptSource,
    Tensor, TensorShape, Value, ValueKind, VertexBuffer, TIMEOUT_MESSAGE,
};

use common::started_engine;

#[test]
fn every_session_call_runs_on_the_owner_thread() -> Result<()> {
    let (engine, recorder) = started_engine();
    let owner = engine.owner_thread_id().expect("owner thread id");
    assert_ne!(owner, thread::current().id());

    let handle = engine.create(CreateParams::default())?;
    engine.show_window(handle)?;
    engine.set_var(handle, "n", 3)?;
    engine.get_int(handle, "n")?;
    engine.hide_window(handle)?;
    engine.destroy(handle)?;

    let threads = recorder.threads.lock().unwrap().clone();
    assert!(!threads.is_empty());
    assert!(threads.iter().all(|id| *id == owner));
    engine.end()?;
    Ok(())
}

#[test]
fn scalar_and_text_values_round_trip() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default().with_title("values"))?;

    engine.set_var(handle, "count", 42)?;
    engine.set_var(handle, "scale", 0.25)?;
    engine.set_var(handle, "label", "hello")?;
    engine.set_var(handle, "tint", Rgba::new(1.0, 0.5, 0.0, 1.0))?;

    assert_eq!(engine.get_int(handle, "count")?, 42);
    assert_eq!(engine.get_double(handle, "scale")?, 0.25);
    assert_eq!(engine.get_text(handle, "label")?, "hello");
    assert_eq!(
        engine.get_color(handle, "tint")?.to_array(),
        [1.0, 0.5, 0.0, 1.0]
    );
    engine.end()?;
    Ok(())
}

#[test]
fn tensors_and_images_round_trip() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;

    let tensor = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;
    engine.set_var(handle, "m", tensor.clone())?;
    assert_eq!(engine.get_tensor(handle, "m")?, tensor);
    assert_eq!(
        engine.get_tensor_shape(handle, "m")?,
        TensorShape {
            dim_count: 2,
            element_count: 6
        }
    );

    let pixels: Vec<u8> = (0..2 * 2 * 4).collect();
    let image = Image::new(2, 2, ImageFormat::Rgba, ImageDataType::U8, pixels)?;
    engine.set_var(handle, "img", image.clone())?;
    let back = engine.get_image(handle, "img")?;
    assert_eq!(back.width(), 2);
    assert_eq!(back.data(), image.data());
    engine.end()?;
    Ok(())
}

#[test]
fn set_only_payloads_are_rejected_on_read() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;

    engine.set_var(handle, "names", vec!["a".to_string(), "b".to_string()])?;
    let buffer = VertexBuffer {
        primitive: Primitive::Triangles,
        positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]],
        normals: None,
        colors: None,
        tex_coords: None,
        indices: vec![0, 1, 2],
    };
    engine.set_var(handle, "mesh", buffer)?;

    let err = engine
        .get_var(handle, "mesh", ValueKind::Vertices)
        .unwrap_err();
    assert_eq!(
        err,
        EngineError::UnsupportedPayload {
            operation: "get_var",
            kind: ValueKind::Vertices
        }
    );
    assert!(engine
        .get_var(handle, "names", ValueKind::TextList)
        .is_err());
    engine.end()?;
    Ok(())
}

#[test]
fn malformed_payloads_never_reach_the_owner_thread() -> Result<()> {
    let (engine, recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;
    let broken = VertexBuffer {
        primitive: Primitive::Lines,
        positions: vec![[0.0; 3], [1.0; 3]],
        normals: Some(vec![[0.0; 3]]),
        colors: None,
        tex_coords: None,
        indices: vec![0, 1],
    };
    let dispatched = engine.dispatch_count();
    assert!(matches!(
        engine.set_var(handle, "mesh", broken),
        Err(EngineError::InvalidArgument(_))
    ));
    assert!(matches!(
        engine.set_var(handle, "", 1),
        Err(EngineError::InvalidArgument(_))
    ));
    assert_eq!(engine.dispatch_count(), dispatched);
    assert!(recorder.assignments.lock().unwrap().is_empty());
    engine.end()?;
    Ok(())
}

#[test]
fn session_errors_reach_the_caller_and_last_error() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;

    let err = engine.set_script(handle, "bad").unwrap_err();
    assert_eq!(err, EngineError::Session("Script error in line 1".into()));
    assert_eq!(engine.last_error(), "Script error in line 1");

    let err = engine.get_int(handle, "missing").unwrap_err();
    assert_eq!(err.to_string(), "Variable 'missing' not found");

    let err = engine
        .create(CreateParams::default().with_title("reject"))
        .unwrap_err();
    assert_eq!(engine.last_error(), err.to_string());
    engine.end()?;
    Ok(())
}

#[test]
fn a_panicking_session_call_does_not_kill_the_owner_thread() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;

    let err = engine.set_script(handle, "panic").unwrap_err();
    assert!(matches!(
        &err,
        EngineError::Panicked { operation: "set_script", message } if message == "script engine exploded"
    ));
    assert!(engine.is_running());
    assert_eq!(engine.is_valid(handle), Ok(true));
    engine.end()?;
    Ok(())
}

#[test]
fn blocked_owner_makes_calls_time_out() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;
    engine.set_call_timeout(Some(Duration::from_millis(100)));

    let started = Instant::now();
    let err = engine.exec_tool(handle, Some("sleep:400")).unwrap_err();
    let elapsed = started.elapsed();
    assert_eq!(err, EngineError::Timeout);
    assert_eq!(engine.last_error(), TIMEOUT_MESSAGE);
    assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(350), "returned after {elapsed:?}");

    // The tool call already started, so it runs to completion.
    engine.set_call_timeout(None);
    let output = engine.get_script_output(handle)?;
    assert_eq!(output.lines, vec!["tool sleep:400".to_string()]);
    engine.end()?;
    Ok(())
}

#[test]
fn callers_queued_behind_a_stuck_call_time_out_on_their_own_budget() -> Result<()> {
    let (engine, recorder) = started_engine();
    let engine = Arc::new(engine);
    let handle = engine.create(CreateParams::default())?;

    let stuck = {
        let engine = engine.clone();
        thread::spawn(move || engine.exec_tool(handle, Some("sleep:400")))
    };
    thread::sleep(Duration::from_millis(50));
    engine.set_call_timeout(Some(Duration::from_millis(100)));

    let started = Instant::now();
    let err = engine.set_var(handle, "queued", 1).unwrap_err();
    let elapsed = started.elapsed();
    assert_eq!(err, EngineError::Timeout);
    assert_eq!(engine.last_error(), TIMEOUT_MESSAGE);
    assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(250), "returned after {elapsed:?}");

    // The stuck call had no deadline and still completes normally.
    stuck.join().expect("stuck caller")?;
    engine.set_call_timeout(None);
    assert!(recorder
        .assignments
        .lock()
        .unwrap()
        .iter()
        .all(|(name, _)| name != "queued"));
    engine.show_window(handle)?;
    engine.end()?;
    Ok(())
}

#[test]
fn abandoned_requests_are_skipped_by_the_owner() -> Result<()> {
    let (engine, recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;
    engine.set_call_timeout(Some(Duration::from_millis(100)));

    // Occupies the owner thread well past both deadlines below.
    let err = engine.exec_tool(handle, Some("sleep:400")).unwrap_err();
    assert_eq!(err, EngineError::Timeout);
    let dispatched = engine.dispatch_count();

    // Published while the owner is busy, then given up on.
    let err = engine.set_var(handle, "late", 7).unwrap_err();
    assert_eq!(err, EngineError::Timeout);

    engine.set_call_timeout(None);
    let err = engine.get_int(handle, "late").unwrap_err();
    assert_eq!(err, EngineError::Session("Variable 'late' not found".into()));
    assert_eq!(engine.dispatch_count(), dispatched + 1);
    assert!(recorder
        .assignments
        .lock()
        .unwrap()
        .iter()
        .all(|(name, _)| name != "late"));
    engine.end()?;
    Ok(())
}

#[test]
fn relative_scripts_resolve_against_the_script_path() -> Result<()> {
    let (engine, _recorder) = started_engine();
    let handle = engine.create(CreateParams::default())?;
    let dir = tempfile::tempdir()?;
    engine.set_script_path(dir.path());

    engine.load_script(handle, ScriptSource::new("scene.lua"))?;
    engine.load_script(handle, ScriptSource::new(dir.path().join("abs.lua")))?;
    let lines = engine.get_script_output(handle)?.lines;
    assert_eq!(
        lines,
        vec![
            dir.path().join("scene.lua").display().to_string(),
            dir.path().join("abs.lua").display().to_string(),
        ]
    );
    engine.end()?;
    Ok(())
}

#[test]
fn concurrent_callers_are_serialised_in_issue_order() -> Result<()> {
    let (engine, recorder) = started_engine();
    let engine = Arc::new(engine);
    let handle = engine.create(CreateParams::default())?;

    let workers: Vec<_> = (0..50)
        .map(|worker| {
            let engine = engine.clone();
            thread::spawn(move || -> Result<(), EngineError> {
                let name = format!("w{worker}");
                for step in 0..5 {
                    engine.set_var(handle, &name, step)?;
                    assert_eq!(engine.get_int(handle, &name)?, step);
                }
                Ok(())
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker thread")?;
    }

    assert_eq!(recorder.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(engine.dispatch_count(), 2 + 50 * 10);

    let assignments = recorder.assignments.lock().unwrap().clone();
    assert_eq!(assignments.len(), 250);
    for worker in 0..50 {
        let name = format!("w{worker}");
        let steps: Vec<Value> = assignments
            .iter()
            .filter(|(var, _)| *var == name)
            .map(|(_, value)| value.clone())
            .collect();
        let expected: Vec<Value> = (0..5).map(Value::Int).collect();
        assert_eq!(steps, expected, "order for {name}");
    }
    engine.end()?;
    Ok(())
}

#[test]
fn last_writer_wins_with_gap_free_dispatch_stamps() -> Result<()> {
    let (engine, recorder) = started_engine();
    let engine = Arc::new(engine);
    let handle = engine.create(CreateParams::default())?;
    let before = engine.dispatch_count();

    let writers: Vec<_> = (0..50)
        .map(|value| {
            let engine = engine.clone();
            thread::spawn(move || engine.set_var(handle, "shared", value))
        })
        .collect();
    for writer in writers {
        writer.join().expect("writer thread")?;
    }
    assert_eq!(engine.dispatch_count() - before, 50);

    let last = recorder
        .assignments
        .lock()
        .unwrap()
        .last()
        .map(|(_, value)| value.clone())
        .expect("assignments recorded");
    assert_eq!(Value::Int(engine.get_int(handle, "shared")?), last);
    engine.end()?;
    Ok(())
}
