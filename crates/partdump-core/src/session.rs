//! Partition dumper - high-level orchestrator.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::cancel::CancelToken;
use crate::catalog::PartitionCatalog;
use crate::client::ProtocolClient;
use crate::dump::{DumpSession, DumpSettings};
use crate::state::DumpState;
use crate::error::{DumpError, ProtocolError};
use crate::events::{DumpEvent, DumpObserver};
use crate::locator::{DeviceLocator, LocatorConfig, LocatorError};
use crate::protocol::DUMP_BLOCK_SIZE;
use crate::transport::{NusbTransport, TransportLink};

/// Configuration for a dumper run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumperConfig {
    /// Delay between USB bus scans while waiting for a device.
    pub poll_interval_ms: u64,
    /// Delay between device reset and interface claim.
    pub settle_delay_ms: u64,
    /// Give up waiting for a device after this many seconds.
    pub device_timeout_secs: Option<u64>,
    /// Bulk OUT write timeout.
    pub send_timeout_ms: u64,
    /// Wait for the answer to a variable query.
    pub query_timeout_ms: u64,
    /// Pause after sending the dump command.
    pub dump_start_delay_ms: u64,
    /// Wait for the `DUMPSTART` answer.
    pub handshake_timeout_ms: u64,
    /// Bytes requested per streamed read.
    pub block_size: usize,
    /// Wait for each streamed block.
    pub stream_timeout_ms: u64,
    /// Consecutive empty streamed reads tolerated.
    pub max_stall_retries: Option<u32>,
}

impl Default for DumperConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            settle_delay_ms: 500,
            device_timeout_secs: None,
            send_timeout_ms: 5000,
            query_timeout_ms: 3000,
            dump_start_delay_ms: 1000,
            handshake_timeout_ms: 10000,
            block_size: DUMP_BLOCK_SIZE,
            stream_timeout_ms: 5000,
            max_stall_retries: None,
        }
    }
}

impl DumperConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DumperConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            deadline: self.device_timeout_secs.map(Duration::from_secs),
            send_timeout: Duration::from_millis(self.send_timeout_ms),
        }
    }

    pub fn dump_settings(&self) -> DumpSettings {
        DumpSettings {
            start_delay: Duration::from_millis(self.dump_start_delay_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            block_size: self.block_size.max(1),
            stream_timeout: Duration::from_millis(self.stream_timeout_ms),
            max_stall_retries: self.max_stall_retries,
        }
    }
}

/// Outcome of a successful dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpReport {
    pub partition: String,
    pub bytes_written: u64,
    /// Size reported by the device, 0 when unknown.
    pub expected_size: u64,
}

/// Partition dumper - get-size, list and dump over one claimed device.
pub struct PartitionDumper<T: TransportLink, O: DumpObserver> {
    client: ProtocolClient<T>,
    observer: Arc<O>,
    settings: DumpSettings,
}

impl<O: DumpObserver> PartitionDumper<NusbTransport, O> {
    /// Wait for a bootloader device and build a dumper over it.
    pub fn connect(
        config: &DumperConfig,
        observer: Arc<O>,
        cancel: CancelToken,
    ) -> Result<Self, LocatorError> {
        let transport = DeviceLocator::new(config.locator_config(), observer.as_ref())
            .with_cancel_token(cancel.clone())
            .scan()?;
        Ok(Self::with_observer(transport, config, observer).with_cancel_token(cancel))
    }
}

impl<T: TransportLink, O: DumpObserver> PartitionDumper<T, O> {
    /// Create a dumper with a custom observer.
    pub fn with_observer(transport: T, config: &DumperConfig, observer: Arc<O>) -> Self {
        Self {
            client: ProtocolClient::new(transport)
                .with_query_timeout(Duration::from_millis(config.query_timeout_ms)),
            observer,
            settings: config.dump_settings(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.client = self.client.with_cancel_token(cancel);
        self
    }

    /// Size of `partition`; a device FAIL is returned to the caller.
    #[instrument(skip(self))]
    pub fn get_partition_size(&mut self, partition: &str) -> Result<u64, ProtocolError> {
        self.client.partition_size(partition)
    }

    #[instrument(skip(self))]
    pub fn list_partitions(&mut self) -> Result<PartitionCatalog, ProtocolError> {
        self.client.enumerate_all()
    }

    /// Dump `partition` into a file at `output`.
    ///
    /// The file is created only once the device starts streaming, so an
    /// existing file survives a refused dump. On a later failure the file
    /// keeps whatever was received before the fault.
    #[instrument(skip(self, output), fields(output = %output.as_ref().display()))]
    pub fn dump_partition(
        &mut self,
        partition: &str,
        output: impl AsRef<Path>,
    ) -> Result<DumpReport, DumpError> {
        let path = output.as_ref();
        let outcome = self
            .session(partition)
            .run_with(|| File::create(path).map(BufWriter::new));
        self.finish(partition, outcome)
    }

    /// Dump `partition` into any writer.
    pub fn dump_to_writer<W: Write>(
        &mut self,
        partition: &str,
        sink: &mut W,
    ) -> Result<DumpReport, DumpError> {
        let outcome = self.session(partition).run(sink);
        self.finish(partition, outcome)
    }

    fn session<'a>(&'a mut self, partition: &'a str) -> DumpSession<'a, T, O> {
        DumpSession::new(
            &mut self.client,
            self.observer.as_ref(),
            &self.settings,
            partition,
        )
    }

    fn finish(
        &self,
        partition: &str,
        outcome: Result<DumpState, DumpError>,
    ) -> Result<DumpReport, DumpError> {
        let result = match outcome {
            Ok(state) if state.bytes_written == 0 => Err(DumpError::Empty),
            Ok(state) => Ok(DumpReport {
                partition: partition.to_string(),
                bytes_written: state.bytes_written,
                expected_size: state.expected_size,
            }),
            Err(e) => Err(e),
        };

        match &result {
            Ok(report) => {
                info!(partition, bytes = report.bytes_written, "Dump finished");
                self.observer.on_event(&DumpEvent::Complete {
                    partition: partition.to_string(),
                    bytes: report.bytes_written,
                });
            }
            Err(e) => self.observer.on_event(&DumpEvent::Error {
                message: e.to_string(),
            }),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::events::{NullObserver, RecordingObserver};
    use crate::transport::MockTransport;

    fn test_config() -> DumperConfig {
        DumperConfig {
            dump_start_delay_ms: 0,
            ..Default::default()
        }
    }

    fn dumper(mock: &MockTransport) -> PartitionDumper<MockTransport, NullObserver> {
        PartitionDumper::with_observer(mock.clone(), &test_config(), Arc::new(NullObserver))
    }

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("partdump-{}-{}.img", std::process::id(), name))
    }

    #[test]
    fn test_get_partition_size_surfaces_fail() {
        let mock = MockTransport::new();
        mock.expect_send(["FAILnot found"]);

        let err = dumper(&mock).get_partition_size("recovery").unwrap_err();
        assert!(matches!(&err, ProtocolError::Fail(msg) if msg == "not found"));
        assert_eq!(
            mock.sent_commands(),
            vec!["getvar:partition-size:recovery".to_string()]
        );
    }

    #[test]
    fn test_dump_survives_size_query_fail() {
        let mock = MockTransport::new();
        mock.expect_send(["FAILnot found"]);
        mock.expect_send(["DUMPSTART", "recovery-bytes", "END"]);
        let path = temp_path("recovery");

        let report = dumper(&mock).dump_partition("recovery", &path).unwrap();

        assert_eq!(report.bytes_written, 14);
        assert_eq!(report.expected_size, 0);
        assert_eq!(std::fs::read(&path).unwrap(), b"recovery-bytes");
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_empty_dump_is_failure() {
        let mock = MockTransport::new();
        mock.expect_send(["OKAY0x1000"]);
        mock.expect_send(["DUMPSTART", "END"]);
        let observer = Arc::new(RecordingObserver::default());
        let mut dumper =
            PartitionDumper::with_observer(mock, &test_config(), observer.clone());

        let mut out = Vec::new();
        let err = dumper.dump_to_writer("boot", &mut out).unwrap_err();

        assert!(matches!(err, DumpError::Empty));
        assert!(out.is_empty());
        assert!(observer.events().iter().any(
            |e| matches!(e, DumpEvent::Error { message } if message == "No data was dumped")
        ));
    }

    #[test]
    fn test_dump_reports_completion() {
        let mock = MockTransport::new();
        mock.expect_send(["OKAY0xa"]);
        mock.expect_send(["DUMPSTART", "hello", "worldENDgarbage"]);
        let observer = Arc::new(RecordingObserver::default());
        let mut dumper =
            PartitionDumper::with_observer(mock, &test_config(), observer.clone());

        let mut out = Vec::new();
        let report = dumper.dump_to_writer("boot", &mut out).unwrap();

        assert_eq!(out, b"helloworld");
        assert_eq!(
            report,
            DumpReport {
                partition: "boot".into(),
                bytes_written: 10,
                expected_size: 10,
            }
        );
        assert!(observer.events().iter().any(
            |e| matches!(e, DumpEvent::Complete { bytes: 10, partition } if partition == "boot")
        ));
    }

    #[test]
    fn test_dump_to_unwritable_path() {
        let mock = MockTransport::new();
        mock.expect_send(["OKAY0x200"]);
        mock.expect_send(["DUMPSTART", "data"]);
        let path = std::env::temp_dir()
            .join("partdump-missing-dir")
            .join("nested")
            .join("boot.img");

        let err = dumper(&mock).dump_partition("boot", &path).unwrap_err();
        assert!(matches!(err, DumpError::Io(_)));
        // The file is opened after DUMPSTART, before any block is read.
        assert_eq!(mock.pending_reads(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_refused_dump_keeps_existing_file() {
        let path = temp_path("keep");
        std::fs::write(&path, b"previous image").unwrap();

        for reply in ["FAILno such partition", "DUMPBUSY"] {
            let mock = MockTransport::new();
            mock.expect_send(["OKAY10"]);
            mock.expect_send([reply]);

            let err = dumper(&mock).dump_partition("boot", &path).unwrap_err();
            assert!(
                matches!(err, DumpError::DeviceFailure(_) | DumpError::NotStarted { .. }),
                "{reply}: {err}"
            );
            assert_eq!(std::fs::read(&path).unwrap(), b"previous image", "{reply}");
        }

        // Silence after the command leaves it alone too.
        let mock = MockTransport::new();
        mock.expect_send(["OKAY10"]);
        let err = dumper(&mock).dump_partition("boot", &path).unwrap_err();
        assert!(matches!(err, DumpError::NoResponse));
        assert_eq!(std::fs::read(&path).unwrap(), b"previous image");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_list_partitions() {
        let mock = MockTransport::new();
        mock.expect_send([
            "INFOpartition-size:boot:200",
            "INFOpartition-type:boot:ext4",
            "OKAY",
        ]);

        let catalog = dumper(&mock).list_partitions().unwrap();
        let boot = catalog.get("boot").unwrap();
        assert_eq!(boot.size, Some(0x200));
        assert_eq!(boot.partition_type.as_deref(), Some("ext4"));
    }

    #[test]
    fn test_list_partitions_fail() {
        let mock = MockTransport::new();
        mock.expect_send(["FAILlocked"]);

        let err = dumper(&mock).list_partitions().unwrap_err();
        assert_eq!(err.to_string(), "locked");
    }

    #[test]
    fn test_config_defaults_fill_partial_toml() {
        let config: DumperConfig = toml::from_str(
            r#"
            device_timeout_secs = 30
            max_stall_retries = 10
            "#,
        )
        .unwrap();

        assert_eq!(config.device_timeout_secs, Some(30));
        assert_eq!(config.max_stall_retries, Some(10));
        assert_eq!(config.poll_interval_ms, 1000);
        assert_eq!(config.block_size, 512);

        let locator = config.locator_config();
        assert_eq!(locator.deadline, Some(Duration::from_secs(30)));
        assert_eq!(locator.settle_delay, Duration::from_millis(500));
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = temp_path("config.toml");
        let config = DumperConfig {
            stream_timeout_ms: 2500,
            device_timeout_secs: Some(5),
            ..Default::default()
        };

        config.save_to_file(&path).unwrap();
        let loaded = DumperConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded, config);
        assert_eq!(
            loaded.dump_settings().stream_timeout,
            Duration::from_millis(2500)
        );
    }
}
