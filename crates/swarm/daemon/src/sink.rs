//! Output towards the monitoring subsystem as JSON lines.

use std::io::Write;

use parking_lot::Mutex;
use serde::Serialize;
use swarm_types::{
    CompletionRecord, MonitoringSink, RefusalRecord, SystemStatusReport, TracingSink,
};

/// One output line.
#[derive(Serialize)]
#[serde(tag = "record", rename_all = "snake_case")]
enum OutputRecord {
    Completion(CompletionRecord),
    Status(SystemStatusReport),
    Refusal(RefusalRecord),
}

/// Writes every record as a JSON line and logs it as well.
pub struct JsonLinesSink<W> {
    out: Mutex<W>,
    log: TracingSink,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
            log: TracingSink,
        }
    }

    fn emit(&self, record: &OutputRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to encode output record");
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            tracing::warn!(error = %e, "Failed to write output record");
        }
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out.into_inner()
    }
}

impl<W: Write + Send> MonitoringSink for JsonLinesSink<W> {
    fn publish_completion(&self, record: CompletionRecord) {
        self.log.publish_completion(record.clone());
        self.emit(&OutputRecord::Completion(record));
    }

    fn publish_status(&self, status: SystemStatusReport) {
        self.log.publish_status(status.clone());
        self.emit(&OutputRecord::Status(status));
    }

    fn publish_refusal(&self, refusal: RefusalRecord) {
        self.log.publish_refusal(refusal.clone());
        self.emit(&OutputRecord::Refusal(refusal));
    }
}
