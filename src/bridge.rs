//! Drives an external engine process over its stdin/stdout.
//!
//! Every request is one JSON line tagged by `op`. Every response is one JSON
//! line `{"ok": .., "error": .., "value": .., "buffers": [..]}`; for each
//! buffer descriptor, `channels * height * width` raw bytes follow the line
//! in descriptor order.

use anyhow::{Context, Result, anyhow, bail, ensure};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

use crate::engine::{Buffer, Engine, EngineConfig, EngineState, GameVariable};

/// Largest buffer accepted from the bridge (64 MiB).
const MAX_BUFFER_BYTES: usize = 64 << 20;

#[derive(Debug, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Request<'a> {
    Init { config: &'a EngineConfig },
    GetState,
    GetGameVariables { variables: &'a [GameVariable] },
    MakeAction { action: &'a [bool], tics: u32 },
    AdvanceAction { tics: u32 },
    IsPlayerDead,
    IsEpisodeFinished,
    NewEpisode,
    RespawnPlayer,
    SendGameCommand { command: &'a str },
    Close,
}

impl Request<'_> {
    fn op(&self) -> &'static str {
        match self {
            Request::Init { .. } => "init",
            Request::GetState => "get_state",
            Request::GetGameVariables { .. } => "get_game_variables",
            Request::MakeAction { .. } => "make_action",
            Request::AdvanceAction { .. } => "advance_action",
            Request::IsPlayerDead => "is_player_dead",
            Request::IsEpisodeFinished => "is_episode_finished",
            Request::NewEpisode => "new_episode",
            Request::RespawnPlayer => "respawn_player",
            Request::SendGameCommand { .. } => "send_game_command",
            Request::Close => "close",
        }
    }
}

#[derive(Debug, Deserialize)]
struct BufferHeader {
    name: String,
    channels: usize,
    height: usize,
    width: usize,
}

#[derive(Debug, Deserialize)]
struct ResponseHeader {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    value: serde_json::Value,
    #[serde(default)]
    buffers: Vec<BufferHeader>,
}

struct Response {
    value: serde_json::Value,
    buffers: Vec<(String, Buffer)>,
}

pub struct BridgeEngine<R, W> {
    reader: R,
    writer: W,
    child: Option<Child>,
}

impl BridgeEngine<BufReader<ChildStdout>, BufWriter<ChildStdin>> {
    /// Start `program args...` and talk to it over its standard streams.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("failed to start engine bridge: {program}"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("engine bridge stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("engine bridge stdout unavailable"))?;
        tracing::info!(program, ?args, pid = child.id(), "engine bridge started");
        Ok(Self {
            reader: BufReader::new(stdout),
            writer: BufWriter::new(stdin),
            child: Some(child),
        })
    }
}

impl<R: BufRead, W: Write> BridgeEngine<R, W> {
    pub fn from_streams(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            child: None,
        }
    }

    pub fn into_streams(self) -> (R, W) {
        (self.reader, self.writer)
    }

    fn call(&mut self, request: Request<'_>) -> Result<Response> {
        let op = request.op();
        serde_json::to_writer(&mut self.writer, &request)
            .with_context(|| format!("failed to encode {op} request"))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .with_context(|| format!("failed to read {op} response"))?;
        ensure!(n > 0, "engine bridge closed the stream during {op}");
        let header: ResponseHeader = serde_json::from_str(line.trim_end())
            .with_context(|| format!("malformed {op} response: {}", line.trim_end()))?;

        let mut buffers = Vec::with_capacity(header.buffers.len());
        for desc in header.buffers {
            let size = desc
                .channels
                .checked_mul(desc.height)
                .and_then(|n| n.checked_mul(desc.width))
                .filter(|&n| n <= MAX_BUFFER_BYTES)
                .ok_or_else(|| {
                    anyhow!(
                        "{} buffer of {}x{}x{} is too large",
                        desc.name,
                        desc.channels,
                        desc.height,
                        desc.width
                    )
                })?;
            let mut data = vec![0u8; size];
            self.reader
                .read_exact(&mut data)
                .with_context(|| format!("truncated {} buffer in {op} response", desc.name))?;
            let buffer = Buffer::new(desc.channels, desc.height, desc.width, data)?;
            buffers.push((desc.name, buffer));
        }

        if !header.ok {
            bail!(
                "engine bridge {op} failed: {}",
                header.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(Response {
            value: header.value,
            buffers,
        })
    }

    fn call_bool(&mut self, request: Request<'_>) -> Result<bool> {
        let op = request.op();
        let response = self.call(request)?;
        response
            .value
            .as_bool()
            .ok_or_else(|| anyhow!("{op} returned {} instead of a bool", response.value))
    }
}

impl<R: BufRead, W: Write> Engine for BridgeEngine<R, W> {
    fn init(&mut self, config: &EngineConfig) -> Result<()> {
        self.call(Request::Init { config })?;
        Ok(())
    }

    fn state(&mut self) -> Result<EngineState> {
        let response = self.call(Request::GetState)?;
        let mut state = EngineState::default();
        for (name, buffer) in response.buffers {
            match name.as_str() {
                "screen" => state.screen = Some(buffer),
                "depth" => state.depth = Some(buffer),
                other => tracing::debug!(buffer = other, "ignoring engine buffer"),
            }
        }
        Ok(state)
    }

    fn game_variables(&mut self, vars: &[GameVariable]) -> Result<Vec<f64>> {
        let response = self.call(Request::GetGameVariables { variables: vars })?;
        let values: Vec<f64> = serde_json::from_value(response.value)
            .context("game variables must be a list of numbers")?;
        ensure!(
            values.len() == vars.len(),
            "asked for {} game variables, got {}",
            vars.len(),
            values.len()
        );
        Ok(values)
    }

    fn make_action(&mut self, buttons: &[bool], tics: u32) -> Result<f64> {
        let response = self.call(Request::MakeAction {
            action: buttons,
            tics,
        })?;
        Ok(response.value.as_f64().unwrap_or(0.0))
    }

    fn advance_action(&mut self, tics: u32) -> Result<()> {
        self.call(Request::AdvanceAction { tics })?;
        Ok(())
    }

    fn is_player_dead(&mut self) -> Result<bool> {
        self.call_bool(Request::IsPlayerDead)
    }

    fn is_episode_finished(&mut self) -> Result<bool> {
        self.call_bool(Request::IsEpisodeFinished)
    }

    fn new_episode(&mut self) -> Result<()> {
        self.call(Request::NewEpisode)?;
        Ok(())
    }

    fn respawn_player(&mut self) -> Result<()> {
        self.call(Request::RespawnPlayer)?;
        Ok(())
    }

    fn send_game_command(&mut self, command: &str) -> Result<()> {
        self.call(Request::SendGameCommand { command })?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.call(Request::Close)?;
        if let Some(mut child) = self.child.take() {
            let status = child.wait().context("failed to wait for engine bridge")?;
            tracing::info!(%status, "engine bridge exited");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn engine_with(responses: Vec<u8>) -> BridgeEngine<Cursor<Vec<u8>>, Vec<u8>> {
        BridgeEngine::from_streams(Cursor::new(responses), Vec::new())
    }

    fn sent_lines(engine: BridgeEngine<Cursor<Vec<u8>>, Vec<u8>>) -> Vec<serde_json::Value> {
        let (_, written) = engine.into_streams();
        String::from_utf8(written)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn state_reads_raw_buffers_after_header() {
        let mut bytes = br#"{"ok":true,"buffers":[{"name":"screen","channels":3,"height":1,"width":2},{"name":"depth","channels":1,"height":1,"width":2}]}"#.to_vec();
        bytes.push(b'\n');
        bytes.extend_from_slice(&[1, 2, 3, 4, 5, 6]);
        bytes.extend_from_slice(&[7, 8]);

        let mut engine = engine_with(bytes);
        let state = engine.state().unwrap();
        let screen = state.screen.unwrap();
        assert_eq!(screen.shape(), (3, 1, 2));
        assert_eq!(screen.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(state.depth.unwrap().data, vec![7, 8]);

        let sent = sent_lines(engine);
        assert_eq!(sent[0]["op"], "get_state");
    }

    #[test]
    fn make_action_sends_buttons_and_tics() {
        let mut engine = engine_with(b"{\"ok\":true,\"value\":1.5}\n".to_vec());
        let reward = engine.make_action(&[true, false, true], 4).unwrap();
        assert_eq!(reward, 1.5);

        let sent = sent_lines(engine);
        assert_eq!(sent[0]["op"], "make_action");
        assert_eq!(sent[0]["action"], serde_json::json!([true, false, true]));
        assert_eq!(sent[0]["tics"], 4);
    }

    #[test]
    fn game_variables_are_named_on_the_wire() {
        let mut engine = engine_with(b"{\"ok\":true,\"value\":[100.0,7.0]}\n".to_vec());
        let vars = [GameVariable::Health, GameVariable::User(2)];
        assert_eq!(engine.game_variables(&vars).unwrap(), vec![100.0, 7.0]);

        let sent = sent_lines(engine);
        assert_eq!(sent[0]["variables"], serde_json::json!(["HEALTH", "USER2"]));
    }

    #[test]
    fn engine_errors_are_reported() {
        let mut engine = engine_with(b"{\"ok\":false,\"error\":\"no map\"}\n".to_vec());
        let err = engine.new_episode().unwrap_err();
        assert!(err.to_string().contains("no map"));
    }

    #[test]
    fn truncated_buffers_and_closed_streams_fail() {
        let mut bytes =
            br#"{"ok":true,"buffers":[{"name":"screen","channels":1,"height":2,"width":2}]}"#
                .to_vec();
        bytes.push(b'\n');
        bytes.extend_from_slice(&[1, 2]);
        let mut engine = engine_with(bytes);
        assert!(engine.state().is_err());

        let mut engine = engine_with(Vec::new());
        assert!(engine.is_player_dead().is_err());
    }

    #[test]
    fn oversized_buffers_are_rejected() {
        let huge = format!(
            "{{\"ok\":true,\"buffers\":[{{\"name\":\"screen\",\"channels\":3,\"height\":{},\"width\":{}}}]}}\n",
            usize::MAX / 2,
            4
        );
        let mut engine = engine_with(huge.into_bytes());
        let err = engine.state().unwrap_err();
        assert!(err.to_string().contains("too large"));

        let mut engine = engine_with(
            b"{\"ok\":true,\"buffers\":[{\"name\":\"screen\",\"channels\":3,\"height\":8192,\"width\":8192}]}\n"
                .to_vec(),
        );
        assert!(engine.state().is_err());
    }

    #[test]
    fn bool_queries_require_bools() {
        let mut engine = engine_with(b"{\"ok\":true,\"value\":true}\n{\"ok\":true,\"value\":3}\n".to_vec());
        assert!(engine.is_player_dead().unwrap());
        assert!(engine.is_episode_finished().is_err());
    }
}
