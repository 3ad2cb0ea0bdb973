use super::{ROUND_TRIP_MAX_MESSAGE_SIZE, ROUND_TRIP_RUNTIME};
use crate::stream::Payload;
use crate::{CancelToken, MessageStream, Reporter};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::time::{Duration, Instant};

/// Latency probe sent by the server. `ST` is the server's send time in
/// microseconds; missing fields decode as zero.
#[derive(Deserialize)]
struct RoundTripRequest {
    #[serde(rename = "SRTT", default)]
    srtt: f64,
    #[serde(rename = "RTTVar", default)]
    rtt_var: f64,
    #[serde(rename = "ST", default)]
    st: i64,
}

/// Reply for every request: sender time echo, the client-side skew
/// between our receive clock and the echoed sender time, and our
/// elapsed time at reply, all in microseconds.
#[derive(Serialize)]
struct RoundTripReply {
    #[serde(rename = "STE")]
    ste: i64,
    #[serde(rename = "STD")]
    std: i64,
    #[serde(rename = "RT")]
    rt: i64,
}

/// Alternate receive/reply of small timestamped control messages for up
/// to 3 seconds. Each server request is forwarded as a measurement
/// record annotated with our elapsed time at receipt.
pub fn round_trip_test<W: Write>(
    stream: &mut dyn MessageStream,
    reporter: &mut Reporter<W>,
    cancel: &CancelToken,
) -> Result<()> {
    let start = Instant::now();
    stream.set_read_deadline(start + ROUND_TRIP_RUNTIME)?;
    stream.set_write_deadline(start + ROUND_TRIP_RUNTIME)?;
    stream.set_read_limit(ROUND_TRIP_MAX_MESSAGE_SIZE);
    while !cancel.is_cancelled() {
        let (request, recv_elapsed) = recv_request(stream, start)?;
        reporter.round_trip(request.srtt, request.rtt_var, recv_elapsed.as_micros() as u64)?;
        let reply = RoundTripReply {
            ste: request.st,
            std: recv_elapsed.as_micros() as i64 - request.st,
            rt: start.elapsed().as_micros() as i64,
        };
        stream.send_text(&serde_json::to_string(&reply)?)?;
    }
    Ok(())
}

/// Stamp the receive time before decoding so decode cost doesn't skew
/// the timing.
fn recv_request(
    stream: &mut dyn MessageStream,
    start: Instant,
) -> Result<(RoundTripRequest, Duration)> {
    let payload = stream.recv()?;
    let recv_elapsed = start.elapsed();
    match payload {
        Payload::Text(text) => Ok((serde_json::from_str(&text)?, recv_elapsed)),
        Payload::Binary(_) => bail!("unexpected message type"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::ScriptedStream;
    use serde_json::Value;

    fn run_one(incoming: Vec<Payload>) -> (ScriptedStream, Vec<u8>, Result<()>) {
        let mut stream = ScriptedStream::new(incoming);
        let mut buf = Vec::new();
        let mut reporter = Reporter::new(&mut buf);
        let cancel = CancelToken::new();
        let result = round_trip_test(&mut stream, &mut reporter, &cancel);
        (stream, buf, result)
    }

    #[test]
    fn reply_echoes_sender_time() {
        let (stream, _, result) = run_one(vec![Payload::Text(
            r#"{"SRTT":10.5,"RTTVar":2.5,"ST":100}"#.to_owned(),
        )]);
        assert!(result.is_err());
        assert_eq!(stream.sent.len(), 1);
        let reply: Value = match &stream.sent[0] {
            Payload::Text(text) => serde_json::from_str(text).unwrap(),
            Payload::Binary(_) => panic!("reply must be text"),
        };
        assert_eq!(reply["STE"], 100);
        // STD is elapsed-at-receive minus ST; RT is measured later still
        let std = reply["STD"].as_i64().unwrap();
        let rt = reply["RT"].as_i64().unwrap();
        assert!(std >= -100);
        assert!(rt >= std + 100);
    }

    #[test]
    fn forwards_request_as_measurement() {
        let (_, buf, _) = run_one(vec![Payload::Text(
            r#"{"SRTT":10.5,"RTTVar":2.5,"ST":100}"#.to_owned(),
        )]);
        let record: Value = std::str::from_utf8(&buf)
            .unwrap()
            .lines()
            .find(|line| !line.is_empty())
            .map(|line| serde_json::from_str(line).unwrap())
            .unwrap();
        assert_eq!(record["AppInfo"]["SRTT"], 10.5);
        assert_eq!(record["AppInfo"]["RTTVar"], 2.5);
        assert_eq!(record["Test"], "roundtrip");
    }

    #[test]
    fn missing_fields_default_to_zero() {
        let (stream, _, _) = run_one(vec![Payload::Text(r#"{"ST":42}"#.to_owned())]);
        let reply: Value = match &stream.sent[0] {
            Payload::Text(text) => serde_json::from_str(text).unwrap(),
            Payload::Binary(_) => panic!("reply must be text"),
        };
        assert_eq!(reply["STE"], 42);
    }

    #[test]
    fn binary_message_is_a_protocol_violation() {
        let (stream, buf, result) = run_one(vec![Payload::Binary(vec![0; 8])]);
        assert_eq!(
            result.unwrap_err().to_string(),
            "unexpected message type"
        );
        assert!(stream.sent.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn undecodable_request_fails() {
        let (_, _, result) = run_one(vec![Payload::Text("not json".to_owned())]);
        assert!(result.is_err());
    }

    #[test]
    fn sets_both_deadlines_and_limit() {
        let (stream, _, _) = run_one(Vec::new());
        assert!(stream.read_deadline.is_some());
        assert!(stream.write_deadline.is_some());
        assert_eq!(stream.read_limit, Some(ROUND_TRIP_MAX_MESSAGE_SIZE));
    }
}
