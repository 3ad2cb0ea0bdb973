use anyhow::Result;
use serde::Serialize;
use std::io::{self, Write};

// Field order matters: serde emits fields in declaration order and the
// downstream formatter matches the records textually.

#[derive(Serialize)]
struct AppInfo {
    #[serde(rename = "NumBytes")]
    num_bytes: u64,
    #[serde(rename = "ElapsedTime")]
    elapsed_time: u64,
}

#[derive(Serialize)]
struct AppInfoRecord<'a> {
    #[serde(rename = "AppInfo")]
    app_info: AppInfo,
    #[serde(rename = "Test")]
    test: &'a str,
}

#[derive(Serialize)]
struct RoundTripInfo {
    #[serde(rename = "SRTT")]
    srtt: f64,
    #[serde(rename = "RTTVar")]
    rtt_var: f64,
    #[serde(rename = "ElapsedTime")]
    elapsed_time: u64,
}

#[derive(Serialize)]
struct RoundTripRecord {
    #[serde(rename = "AppInfo")]
    app_info: RoundTripInfo,
    #[serde(rename = "Test")]
    test: &'static str,
}

#[derive(Serialize)]
struct FailureRecord<'a> {
    #[serde(rename = "Failure")]
    failure: &'a str,
    #[serde(rename = "Test")]
    test: &'a str,
}

/// Emits the machine-readable record stream: one JSON object per line,
/// each followed by a blank line so downstream consumers can split on
/// the separator. Writes are synchronous and flushed per record.
pub struct Reporter<W: Write> {
    out: W,
}

impl Reporter<io::Stdout> {
    pub fn stdout() -> Reporter<io::Stdout> {
        Reporter::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Reporter<W> {
        Reporter { out }
    }

    /// Client-side progress record for the download or upload test.
    pub fn app_info(&mut self, test: &str, num_bytes: u64, elapsed_micros: u64) -> Result<()> {
        self.record(&AppInfoRecord {
            app_info: AppInfo {
                num_bytes,
                elapsed_time: elapsed_micros,
            },
            test,
        })
    }

    /// Server-reported round-trip numbers annotated with client elapsed time.
    pub fn round_trip(&mut self, srtt: f64, rtt_var: f64, elapsed_micros: u64) -> Result<()> {
        self.record(&RoundTripRecord {
            app_info: RoundTripInfo {
                srtt,
                rtt_var,
                elapsed_time: elapsed_micros,
            },
            test: "roundtrip",
        })
    }

    /// Terminal record for a sub-test that ended in error.
    pub fn failure(&mut self, test: &str, err: &anyhow::Error) -> Result<()> {
        self.record(&FailureRecord {
            failure: &err.to_string(),
            test,
        })
    }

    /// A measurement the server already formatted; forwarded verbatim
    /// on its own line.
    pub fn passthrough(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)?;
        self.out.flush()?;
        Ok(())
    }

    fn record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n\n")?;
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn emitted<F: FnOnce(&mut Reporter<&mut Vec<u8>>)>(f: F) -> String {
        let mut buf = Vec::new();
        let mut reporter = Reporter::new(&mut buf);
        f(&mut reporter);
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn app_info_record_shape() {
        let out = emitted(|r| r.app_info("download", 2048, 100).unwrap());
        assert_eq!(
            out,
            "{\"AppInfo\":{\"NumBytes\":2048,\"ElapsedTime\":100},\"Test\":\"download\"}\n\n"
        );
    }

    #[test]
    fn round_trip_record_shape() {
        let out = emitted(|r| r.round_trip(10.5, 2.5, 150).unwrap());
        assert_eq!(
            out,
            "{\"AppInfo\":{\"SRTT\":10.5,\"RTTVar\":2.5,\"ElapsedTime\":150},\"Test\":\"roundtrip\"}\n\n"
        );
    }

    #[test]
    fn failure_record_shape() {
        let out = emitted(|r| r.failure("upload", &anyhow!("broken pipe")).unwrap());
        assert_eq!(out, "{\"Failure\":\"broken pipe\",\"Test\":\"upload\"}\n\n");
    }

    #[test]
    fn passthrough_is_verbatim() {
        let line = r#"{"AppInfo":{"NumBytes":1,"ElapsedTime":2},"Test":"download"}"#;
        let out = emitted(|r| r.passthrough(line).unwrap());
        assert_eq!(out, format!("{}\n", line));
    }
}
