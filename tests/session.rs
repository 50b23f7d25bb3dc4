use tone_stream::backend::{
    BufferId, ContextId, DeviceCall, DeviceId, Fault, Operation, SimulatedDevice, SourceId,
};
use tone_stream::session::SessionError;
use tone_stream::{PlaybackSession, SessionConfig, StreamConfig};

fn open_with_fault(fault: Fault) -> (Result<(), SessionError>, Vec<DeviceCall>, String) {
    let mut device = SimulatedDevice::new().with_fault(fault);
    let journal = device.journal();
    let mut diag = Vec::new();
    let result = PlaybackSession::open(&mut device, &SessionConfig::default(), &mut diag).map(drop);
    let calls = journal.lock().calls.clone();
    (result, calls, String::from_utf8(diag).unwrap())
}

#[test]
fn open_device_failure_touches_nothing() {
    let (result, calls, diag) = open_with_fault(Fault::on(Operation::OpenDevice, 1));
    assert!(matches!(result, Err(SessionError::OpenDevice(_))));
    assert!(calls.is_empty());
    assert_eq!(diag, "Error opening output device!\n");
}

#[test]
fn context_failure_closes_device() {
    let (result, calls, diag) = open_with_fault(Fault::on(Operation::CreateContext, 1));
    assert!(matches!(result, Err(SessionError::CreateContext(_))));
    assert_eq!(
        calls,
        vec![
            DeviceCall::OpenDevice(DeviceId(1)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
    assert_eq!(diag, "Context error in creating context: Invalid value!\n");
}

#[test]
fn make_current_failure_destroys_context() {
    let (result, calls, diag) = open_with_fault(Fault::on(Operation::MakeContextCurrent, 1));
    assert!(matches!(result, Err(SessionError::MakeCurrent(_))));
    assert_eq!(
        calls,
        vec![
            DeviceCall::OpenDevice(DeviceId(1)),
            DeviceCall::CreateContext(ContextId(2)),
            DeviceCall::DestroyContext(ContextId(2)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
    assert_eq!(diag, "Context error in making context current: Invalid context!\n");
}

#[test]
fn source_failure_clears_current_context() {
    let (result, calls, diag) = open_with_fault(Fault::on(Operation::CreateSource, 1));
    assert!(matches!(result, Err(SessionError::CreateSource(_))));
    assert_eq!(
        calls,
        vec![
            DeviceCall::OpenDevice(DeviceId(1)),
            DeviceCall::CreateContext(ContextId(2)),
            DeviceCall::MakeContextCurrent(Some(ContextId(2))),
            DeviceCall::MakeContextCurrent(None),
            DeviceCall::DestroyContext(ContextId(2)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
    assert_eq!(diag, "Device error in creating audio sources: Invalid operation!\n");
}

#[test]
fn buffer_failure_deletes_source() {
    let (result, calls, diag) = open_with_fault(Fault::on(Operation::CreateBuffers, 1));
    assert!(matches!(result, Err(SessionError::CreateBuffers(_))));
    assert_eq!(
        calls,
        vec![
            DeviceCall::OpenDevice(DeviceId(1)),
            DeviceCall::CreateContext(ContextId(2)),
            DeviceCall::MakeContextCurrent(Some(ContextId(2))),
            DeviceCall::CreateSource(SourceId(3)),
            DeviceCall::DeleteSource(SourceId(3)),
            DeviceCall::MakeContextCurrent(None),
            DeviceCall::DestroyContext(ContextId(2)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
    assert_eq!(diag, "Device error in creating audio buffers: Invalid operation!\n");
}

#[test]
fn close_releases_in_reverse_order() {
    let mut device = SimulatedDevice::new();
    let journal = device.journal();
    let config = SessionConfig::default();
    let mut session = PlaybackSession::open(&mut device, &config, &mut std::io::sink()).unwrap();
    let pool = vec![BufferId(4), BufferId(5), BufferId(6)];
    assert_eq!(session.buffers(), pool.as_slice());

    let samples = config.tone.render();
    let report = session
        .stream(&samples, &config.stream, std::io::sink())
        .unwrap();
    assert!(report.completed);
    session.close();

    let calls = journal.lock().calls.clone();
    assert_eq!(
        calls[calls.len() - 5..],
        [
            DeviceCall::DeleteBuffers(pool),
            DeviceCall::DeleteSource(SourceId(3)),
            DeviceCall::MakeContextCurrent(None),
            DeviceCall::DestroyContext(ContextId(2)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
}

#[test]
fn teardown_continues_past_failures() {
    // Unqueueing never works, so the buffers stay attached to the source
    let mut device = SimulatedDevice::new().with_fault(Fault::always_from(Operation::Unqueue, 1));
    let journal = device.journal();
    let config = SessionConfig::default();
    let mut session = PlaybackSession::open(&mut device, &config, &mut std::io::sink()).unwrap();

    let samples = vec![0i16; 50_000];
    let report = session
        .stream(&samples, &StreamConfig::new(3, 256, 44_100), std::io::sink())
        .unwrap();
    assert_eq!(report.errors, 2);
    assert!(!journal.lock().queued.is_empty());
    drop(session);

    let journal = journal.lock();
    assert!(journal.queued.is_empty());
    // Buffers are deleted once the source no longer holds them
    let source_at = journal
        .calls
        .iter()
        .position(|call| *call == DeviceCall::DeleteSource(SourceId(3)))
        .unwrap();
    let buffers_at = journal
        .calls
        .iter()
        .position(|call| matches!(call, DeviceCall::DeleteBuffers(_)))
        .unwrap();
    assert!(buffers_at > source_at);
    assert_eq!(
        journal.calls[buffers_at],
        DeviceCall::DeleteBuffers(vec![BufferId(4), BufferId(5), BufferId(6)])
    );
    assert_eq!(journal.calls.last(), Some(&DeviceCall::CloseDevice(DeviceId(1))));
}

#[test]
fn failed_first_play_still_deletes_buffers() {
    let mut device = SimulatedDevice::new().with_fault(Fault::on(Operation::Play, 1));
    let journal = device.journal();
    let config = SessionConfig::default();
    let mut session = PlaybackSession::open(&mut device, &config, &mut std::io::sink()).unwrap();

    let samples = vec![0i16; 10_000];
    let report = session
        .stream(&samples, &config.stream, std::io::sink())
        .unwrap();
    assert_eq!(report.errors, 1);
    assert!(!report.completed);
    drop(session);

    let journal = journal.lock();
    assert!(journal.queued.is_empty());
    assert_eq!(
        journal.count(|call| matches!(call, DeviceCall::DeleteBuffers(_))),
        1
    );
    assert_eq!(
        journal.calls[journal.calls.len() - 5..],
        [
            DeviceCall::DeleteBuffers(vec![BufferId(4), BufferId(5), BufferId(6)]),
            DeviceCall::DeleteSource(SourceId(3)),
            DeviceCall::MakeContextCurrent(None),
            DeviceCall::DestroyContext(ContextId(2)),
            DeviceCall::CloseDevice(DeviceId(1)),
        ]
    );
}

#[test]
fn session_can_stream_twice() {
    let mut device = SimulatedDevice::new();
    let config = SessionConfig::default();
    let mut session = PlaybackSession::open(&mut device, &config, &mut std::io::sink()).unwrap();
    let samples = vec![100i16; 10_000];

    for _ in 0..2 {
        let report = session
            .stream(&samples, &config.stream, std::io::sink())
            .unwrap();
        assert!(report.completed, "{report:?}");
        assert_eq!(report.samples_queued, 10_000);
    }
}
