//! Full upload protocol runs against the emulated devices

use frerflash_dummy::{ConsoleBehavior, DummyConsole, DummyRegisterDevice};

use frerflash_core::error::{Error, TransportError};
use frerflash_core::image::{validate, ImageBuilder, ImageKind};
use frerflash_core::layout::{MemoryLayout, SJA1110_DEVICE_ID};
use frerflash_core::stream::{DeviceModel, ReplicationStream};
use frerflash_core::upload::{
    CancelToken, UploadOptions, UploadProgress, UploadSession, UploadState,
};
use std::time::Duration;

struct Recorder {
    states: Vec<UploadState>,
    chunks_sent: usize,
    total_chunks: usize,
}

impl Recorder {
    fn new() -> Self {
        Self {
            states: Vec::new(),
            chunks_sent: 0,
            total_chunks: 0,
        }
    }
}

impl UploadProgress for Recorder {
    fn state_changed(&mut self, state: UploadState) {
        self.states.push(state);
    }

    fn starting(&mut self, _total_bytes: usize, total_chunks: usize) {
        self.total_chunks = total_chunks;
    }

    fn chunk_sent(&mut self, chunks_sent: usize, _total_chunks: usize) {
        self.chunks_sent = chunks_sent;
    }
}

fn fast_options() -> UploadOptions {
    let _ = env_logger::builder().is_test(true).try_init();
    UploadOptions {
        reset_settle: Duration::from_millis(1),
        command_timeout: Duration::from_millis(200),
        completion_timeout: Duration::from_millis(500),
        inter_chunk_delay: Duration::ZERO,
        ..UploadOptions::default()
    }
}

fn sample_image(layout: &MemoryLayout) -> frerflash_core::EncodedImage {
    let device = DeviceModel::goldbox();
    let stream = ReplicationStream::builder(1)
        .ingress(2)
        .egress_ports([3u8, 4])
        .vlan(100)
        .build(&device)
        .unwrap();
    ImageBuilder::new(layout).build_switch(&[stream]).unwrap()
}

#[test]
fn serial_upload_streams_whole_image_in_1k_chunks() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::Normal),
        fast_options(),
    );
    let mut recorder = Recorder::new();
    let report = session
        .upload(&image, &mut recorder, &CancelToken::new())
        .unwrap();

    assert_eq!(report.state, UploadState::Done);
    assert_eq!(report.total_chunks, image.len().div_ceil(1024));
    assert_eq!(report.chunks_sent, report.total_chunks);
    assert!(report.device_verified);
    assert!(report.completion_verified);
    assert_eq!(
        recorder.states,
        [
            UploadState::Verifying,
            UploadState::Ready,
            UploadState::Downloading,
            UploadState::Completing,
            UploadState::Done,
        ]
    );
}

#[test]
fn serial_upload_delivers_exact_image_bytes() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);
    validate(image.as_bytes(), &layout, ImageKind::SwitchConfig).unwrap();

    let mut console = DummyConsole::new(ConsoleBehavior::Normal);
    {
        let mut session = UploadSession::with_options(&mut console, fast_options());
        session
            .upload(&image, &mut Recorder::new(), &CancelToken::new())
            .unwrap();
    }

    assert_eq!(console.received(), image.as_bytes());
    assert_eq!(
        console.commands(),
        ["version".to_string(), format!("upload {}", image.len())]
    );
}

#[test]
fn rejected_size_fails_before_any_chunk() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::RejectSize),
        fast_options(),
    );
    let mut recorder = Recorder::new();
    let err = session
        .upload(&image, &mut recorder, &CancelToken::new())
        .unwrap_err();

    match err {
        Error::Transport(TransportError::UnexpectedResponse(reply)) => {
            assert!(reply.contains("bad size"), "unexpected reply: {reply}");
        }
        other => panic!("expected UnexpectedResponse, got {other:?}"),
    }
    assert_eq!(recorder.chunks_sent, 0);
    assert_eq!(session.state(), UploadState::Failed);
    assert_eq!(recorder.states.last(), Some(&UploadState::Failed));
}

#[test]
fn silent_device_times_out_during_verification() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::Silent),
        fast_options(),
    );
    let err = session
        .upload(&image, &mut Recorder::new(), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::Timeout)
    ));
    assert_eq!(session.state(), UploadState::Failed);
}

#[test]
fn cancellation_aborts_at_the_next_chunk_boundary() {
    struct CancelAfter {
        token: CancelToken,
        after: usize,
        chunks_sent: usize,
    }

    impl UploadProgress for CancelAfter {
        fn state_changed(&mut self, _state: UploadState) {}
        fn starting(&mut self, _total_bytes: usize, _total_chunks: usize) {}
        fn chunk_sent(&mut self, chunks_sent: usize, _total_chunks: usize) {
            self.chunks_sent = chunks_sent;
            if chunks_sent == self.after {
                self.token.cancel();
            }
        }
    }

    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let cancel = CancelToken::new();
    let mut progress = CancelAfter {
        token: cancel.clone(),
        after: 3,
        chunks_sent: 0,
    };
    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::Normal),
        fast_options(),
    );
    let err = session.upload(&image, &mut progress, &cancel).unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::Cancelled)
    ));
    assert_eq!(progress.chunks_sent, 3);
}

#[test]
fn cancellation_interrupts_a_prompt_wait() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    // A silent device would otherwise run out the command timeout
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::Silent),
        fast_options(),
    );
    let err = session
        .upload(&image, &mut Recorder::new(), &cancel)
        .unwrap_err();

    assert!(matches!(
        err,
        Error::Transport(TransportError::Cancelled)
    ));
}

#[test]
fn prompt_without_success_token_is_not_a_confirmation() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut session = UploadSession::with_options(
        DummyConsole::new(ConsoleBehavior::NoConfirmation),
        fast_options(),
    );
    let err = session
        .upload(&image, &mut Recorder::new(), &CancelToken::new())
        .unwrap_err();

    assert!(matches!(err, Error::Transport(TransportError::Timeout)));
    assert_eq!(session.state(), UploadState::Failed);
}

#[test]
fn terminal_state_releases_the_transport() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let cancel = CancelToken::new();
    cancel.cancel();

    let mut session = UploadSession::with_options(
        DummyRegisterDevice::new(SJA1110_DEVICE_ID),
        fast_options(),
    );
    let err = session
        .upload(&image, &mut Recorder::new(), &cancel)
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Transport(TransportError::Cancelled)
    ));

    // Failed released the device, so a retry on the same session cannot
    // reach the wire
    let err = session
        .upload(&image, &mut Recorder::new(), &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, Error::Transport(TransportError::Closed)));
}

#[test]
fn register_upload_reassembles_in_staging_area() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut device = DummyRegisterDevice::new(SJA1110_DEVICE_ID);
    let options = UploadOptions {
        reset_first: true,
        expected_device_id: Some(SJA1110_DEVICE_ID),
        ..fast_options()
    };
    let report;
    {
        let mut session = UploadSession::with_options(&mut device, options);
        report = session
            .upload(&image, &mut Recorder::new(), &CancelToken::new())
            .unwrap();
    }

    assert_eq!(report.total_chunks, image.len().div_ceil(256));
    assert!(report.device_verified);
    // The register wire has no completion signal
    assert!(!report.completion_verified);
    assert_eq!(device.resets(), 1);
    assert_eq!(device.config_bytes(), image.as_bytes());
}

#[test]
fn register_upload_continues_unverified_on_unknown_device() {
    let layout = MemoryLayout::sja1110_rev_b();
    let image = sample_image(&layout);

    let mut device = DummyRegisterDevice::new(0x0102_0304);
    let options = UploadOptions {
        expected_device_id: Some(SJA1110_DEVICE_ID),
        ..fast_options()
    };
    let report;
    {
        let mut session = UploadSession::with_options(&mut device, options);
        report = session
            .upload(&image, &mut Recorder::new(), &CancelToken::new())
            .unwrap();
    }

    // An id mismatch only downgrades the report, the image still goes out
    assert_eq!(report.state, UploadState::Done);
    assert!(!report.device_verified);
    assert_eq!(device.config_bytes(), image.as_bytes());
}
