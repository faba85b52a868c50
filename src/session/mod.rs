use std::time::Duration;

use futures::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;

use crate::error::{Error, Result};
use crate::protocols::kv::{join_list, DeviceId, FirmwareSet, InboundFrame, KvCodec, UpdateRequest};

mod config;
mod types;

pub use types::*;

/// Chooses which of the announced devices get updated.
pub trait TargetSelector {
    fn select(&mut self, devices: &[DeviceId]) -> Vec<DeviceId>;
}

/// Updates every announced device.
#[derive(Debug, Default, Clone, Copy)]
pub struct SelectAll;

impl TargetSelector for SelectAll {
    fn select(&mut self, devices: &[DeviceId]) -> Vec<DeviceId> {
        if devices.len() == 1 {
            info!("Updating device {}", devices[0]);
        } else {
            info!("Device(s) available for update: {}", join_list(devices));
        }
        devices.to_vec()
    }
}

impl<F> TargetSelector for F
where
    F: FnMut(&[DeviceId]) -> Vec<DeviceId>,
{
    fn select(&mut self, devices: &[DeviceId]) -> Vec<DeviceId> {
        self(devices)
    }
}

/// One update exchange over an already connected stream.
///
/// The stream is owned by the session and closed when the session is
/// dropped, whichever phase it ends in.
pub struct UpdateSession<T> {
    framed: Framed<T, KvCodec>,
    config: SessionConfig,
    firmware: FirmwareSet,
    selector: Box<dyn TargetSelector + Send>,
}

impl<T: AsyncRead + AsyncWrite + Unpin> UpdateSession<T> {
    pub fn new(stream: T, firmware: FirmwareSet, config: SessionConfig) -> Result<Self> {
        config.validate()?;

        let codec = KvCodec::with_max_frame_size(config.max_frame_size);
        let framed = Framed::with_capacity(stream, codec, config.max_frame_size);

        Ok(Self {
            framed,
            config,
            firmware,
            selector: Box::new(SelectAll),
        })
    }

    pub fn with_selector(mut self, selector: impl TargetSelector + Send + 'static) -> Self {
        self.selector = Box::new(selector);
        self
    }

    /// Drives the exchange to a terminal phase.
    pub async fn run(mut self) -> Outcome {
        let mut phase = Phase::Connecting;
        while !phase.is_terminal() {
            phase = self.step(phase).await;
        }

        match phase {
            Phase::Terminal(outcome) => {
                debug!("Session finished: {:?}", outcome);
                outcome
            }
            _ => unreachable!("loop exits only on a terminal phase"),
        }
    }

    /// Performs exactly one transition. A terminal phase is returned as is.
    pub async fn step(&mut self, phase: Phase) -> Phase {
        let waiting = phase.waiting();

        let next = match phase {
            // the transport is connected before the session exists
            Phase::Connecting => Ok(Phase::AwaitingDeviceList(SessionState::default())),
            Phase::AwaitingDeviceList(state) => self.await_device_list(state).await,
            Phase::SelectingTargets(state) => self.select_targets(state).await,
            Phase::AwaitingUpdateResult { state, targets } => {
                self.await_update_result(state, targets).await
            }
            Phase::Reporting(state) => Ok(Phase::Terminal(Self::report(state))),
            terminal @ Phase::Terminal(_) => Ok(terminal),
        };

        next.unwrap_or_else(|err| {
            error!("{}", err);
            Phase::Terminal(Outcome::from_error(err, waiting))
        })
    }

    async fn await_device_list(&mut self, state: SessionState) -> Result<Phase> {
        let frame = self.receive(self.config.device_list_timeout).await?;
        Ok(Phase::SelectingTargets(state.apply(frame)))
    }

    async fn select_targets(&mut self, state: SessionState) -> Result<Phase> {
        if state.devices.is_empty() {
            error!("No device(s) available for update");
            return Ok(Phase::Terminal(Outcome::NoDevices));
        }

        let targets = self.selector.select(&state.devices);
        if targets.is_empty() {
            info!("No device selected, nothing to do");
            return Ok(Phase::Terminal(Outcome::NothingToDo));
        }

        if self.firmware.m0.is_none() {
            warn!("Note: no m0 firmware found");
        }

        let request = UpdateRequest::new(targets.clone(), self.firmware.clone());
        info!("Requesting update of {}", join_list(&targets));
        self.framed.send(request).await?;

        Ok(Phase::AwaitingUpdateResult { state, targets })
    }

    async fn await_update_result(
        &mut self,
        state: SessionState,
        targets: Vec<DeviceId>,
    ) -> Result<Phase> {
        let timeout = self.config.result_timeout(targets.len());
        debug!("Waiting up to {:?} for update result", timeout);
        let frame = self.receive(timeout).await?;
        Ok(Phase::Reporting(state.apply(frame)))
    }

    fn report(state: SessionState) -> Outcome {
        let report = Report::new(state);

        let unexpected = report.unexpected();
        if !unexpected.is_empty() {
            warn!(
                "Server confirmed devices it never announced: {}",
                join_list(&unexpected)
            );
        }

        if report.is_success() {
            info!("All devices updated");
        } else if !report.failures.is_empty() {
            error!("Failed to update: {}", join_list(&report.failures));
        } else {
            error!("No device(s) available for update");
        }

        Outcome::Completed(report)
    }

    /// Waits for one frame. A frame without recognized fields still counts
    /// as a response; end of stream before any data counts as no response.
    async fn receive(&mut self, timeout: Duration) -> Result<InboundFrame> {
        if timeout.is_zero() {
            return Err(Error::Timeout);
        }

        match tokio::time::timeout(timeout, self.framed.next()).await {
            Err(_) => Err(Error::Timeout),
            Ok(None) => Err(Error::ConnectionClosed),
            Ok(Some(frame)) => {
                let frame = frame?;
                if !frame.has_content() {
                    debug!(
                        "Frame without recognized fields ({} lines ignored)",
                        frame.ignored_lines
                    );
                }
                Ok(frame)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn ids(names: &[&str]) -> Vec<DeviceId> {
        names.iter().filter_map(DeviceId::new).collect()
    }

    fn fast_config() -> SessionConfig {
        SessionConfig::new()
            .with_device_list_timeout(Duration::from_millis(200))
            .with_result_base_timeout(Duration::from_millis(200))
            .with_result_per_device_timeout(Duration::from_millis(50))
    }

    fn session(config: SessionConfig) -> (UpdateSession<DuplexStream>, DuplexStream) {
        let (client, server) = duplex(64 * 1024);
        let session = UpdateSession::new(client, FirmwareSet::new("m4.bin"), config).unwrap();
        (session, server)
    }

    #[tokio::test]
    async fn connecting_moves_to_device_list() {
        let (mut session, _server) = session(fast_config());
        let next = session.step(Phase::Connecting).await;
        assert_eq!(next, Phase::AwaitingDeviceList(SessionState::default()));
    }

    #[tokio::test]
    async fn device_list_wait_times_out() {
        let (mut session, _server) = session(fast_config());
        let next = session
            .step(Phase::AwaitingDeviceList(SessionState::default()))
            .await;
        assert_eq!(next, Phase::Terminal(Outcome::NoResponse(Waiting::DeviceList)));
    }

    #[tokio::test]
    async fn zero_timeout_is_already_expired() {
        let config = fast_config().with_device_list_timeout(Duration::ZERO);
        let (mut session, mut server) = session(config);
        server.write_all(b"devices=a").await.unwrap();

        let next = session
            .step(Phase::AwaitingDeviceList(SessionState::default()))
            .await;
        assert_eq!(next, Phase::Terminal(Outcome::NoResponse(Waiting::DeviceList)));
    }

    #[tokio::test]
    async fn frame_without_fields_is_not_a_timeout() {
        let (mut session, mut server) = session(fast_config());
        server.write_all(b"hello").await.unwrap();

        let next = session
            .step(Phase::AwaitingDeviceList(SessionState::default()))
            .await;
        assert_eq!(next, Phase::SelectingTargets(SessionState::default()));
    }

    #[tokio::test]
    async fn closed_stream_counts_as_no_response() {
        let (mut session, server) = session(fast_config());
        drop(server);

        let next = session
            .step(Phase::AwaitingDeviceList(SessionState::default()))
            .await;
        assert_eq!(next, Phase::Terminal(Outcome::NoResponse(Waiting::DeviceList)));
    }

    #[tokio::test]
    async fn empty_device_list_sends_nothing() {
        let (mut session, mut server) = session(fast_config());
        let next = session
            .step(Phase::SelectingTargets(SessionState::default()))
            .await;
        assert_eq!(next, Phase::Terminal(Outcome::NoDevices));

        drop(session);
        let mut buf = Vec::new();
        server.read_to_end(&mut buf).await.unwrap();
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn empty_selection_is_nothing_to_do() {
        let (session, _server) = session(fast_config());
        let mut session = session.with_selector(|_: &[DeviceId]| Vec::<DeviceId>::new());
        let state = SessionState {
            devices: ids(&["a"]),
            updated: vec![],
        };
        let next = session.step(Phase::SelectingTargets(state)).await;
        assert_eq!(next, Phase::Terminal(Outcome::NothingToDo));
    }

    #[tokio::test]
    async fn selection_sends_update_command() {
        let (client, mut server) = duplex(64 * 1024);
        let firmware = FirmwareSet::new("/fw/m4.bin").with_m0("/fw/m0.bin");
        let mut session = UpdateSession::new(client, firmware, fast_config()).unwrap();
        let state = SessionState {
            devices: ids(&["a", "b"]),
            updated: vec![],
        };

        let next = session.step(Phase::SelectingTargets(state.clone())).await;
        assert_eq!(
            next,
            Phase::AwaitingUpdateResult {
                state,
                targets: ids(&["a", "b"]),
            }
        );

        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(
            &buf[..n],
            b"update_devices=a,b\nfw_m0=/fw/m0.bin\nfw_m4=/fw/m4.bin"
        );
    }

    #[tokio::test]
    async fn custom_selector_limits_targets() {
        let (client, mut server) = duplex(64 * 1024);
        let mut session = UpdateSession::new(client, FirmwareSet::new("m4.bin"), fast_config())
            .unwrap()
            .with_selector(|devices: &[DeviceId]| devices[..1].to_vec());
        let state = SessionState {
            devices: ids(&["a", "b"]),
            updated: vec![],
        };

        let next = session.step(Phase::SelectingTargets(state)).await;
        assert!(matches!(
            next,
            Phase::AwaitingUpdateResult { ref targets, .. } if *targets == ids(&["a"])
        ));

        let mut buf = vec![0u8; 1024];
        let n = server.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"update_devices=a\nfw_m4=m4.bin");
    }

    #[tokio::test]
    async fn update_result_wait_times_out_with_prior_state() {
        let (mut session, _server) = session(fast_config());
        let state = SessionState {
            devices: ids(&["a"]),
            updated: vec![],
        };
        let next = session
            .step(Phase::AwaitingUpdateResult {
                state,
                targets: ids(&["a"]),
            })
            .await;
        assert_eq!(next, Phase::Terminal(Outcome::NoResponse(Waiting::UpdateResult)));
    }

    #[tokio::test]
    async fn reporting_is_terminal() {
        let (mut session, _server) = session(fast_config());
        let state = SessionState {
            devices: ids(&["dev1", "dev2", "dev3"]),
            updated: ids(&["dev1", "dev3"]),
        };
        let next = session.step(Phase::Reporting(state)).await;
        let report = match next {
            Phase::Terminal(Outcome::Completed(report)) => report,
            other => panic!("expected completed report, got {:?}", other),
        };
        assert_eq!(report.retained_devices(), ids(&["dev2"]).as_slice());

        let again = session.step(Phase::Terminal(Outcome::NoDevices)).await;
        assert_eq!(again, Phase::Terminal(Outcome::NoDevices));
    }

    #[tokio::test]
    async fn full_run_over_duplex() {
        let (session, mut server) = session(fast_config());
        let server = tokio::spawn(async move {
            server.write_all(b"devices=43xx_m0,43xx_m4").await.unwrap();
            let mut buf = vec![0u8; 1024];
            let n = server.read(&mut buf).await.unwrap();
            assert!(buf[..n].starts_with(b"update_devices=43xx_m0,43xx_m4"));
            server.write_all(b"updated=43xx_m0,43xx_m4").await.unwrap();
            server
        });

        let outcome = session.run().await;
        assert!(outcome.is_success());
        assert!(outcome.report().unwrap().failures.is_empty());
        drop(server.await.unwrap());
    }
}
