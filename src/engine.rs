//! Engine adapter.
//! Talks UCI to an external search process (Stockfish or compatible)
//! over stdio. Every request is bounded by a reply timeout; a search that
//! overruns is stopped and drained so the scan loop can carry on with a
//! clean protocol state. Evaluations are centipawns from the side to
//! move.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};

/// One ranked candidate move; lists are ordered best-first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineCandidate {
    pub mv: String,
    pub eval_cp: i32,
}

/// The move-search seam. The scan loop and selector only ever talk to
/// this interface; tests drive them with a scripted implementation.
pub trait Engine {
    /// Up to `count` ranked candidates for the position, best first.
    fn top_moves(
        &mut self,
        fen: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<EngineCandidate>>> + Send;

    /// Plain best-move query.
    fn best_move(&mut self, fen: &str) -> impl Future<Output = Result<Option<String>>> + Send;
}

/// Mate announcements are folded onto the centipawn scale so ordering
/// and deltas stay meaningful: faster mates score higher.
const MATE_SCORE: i32 = 10_000;

pub struct UciEngine {
    child: Child,
    stdin: ChildStdin,
    reader: Lines<BufReader<ChildStdout>>,
    depth: u32,
    reply_timeout: Duration,
    multipv: usize,
}

impl UciEngine {
    /// Locates the engine binary: an explicit path wins, then `PATH`,
    /// then the usual install locations.
    pub fn find_binary(explicit: Option<&Path>) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return if path.is_file() {
                Ok(path.to_path_buf())
            } else {
                Err(Error::EngineNotFound)
            };
        }
        if let Some(paths) = std::env::var_os("PATH") {
            for dir in std::env::split_paths(&paths) {
                let candidate = dir.join("stockfish");
                if candidate.is_file() {
                    return Ok(candidate);
                }
            }
        }
        for fallback in [
            "/opt/homebrew/bin/stockfish",
            "/usr/local/bin/stockfish",
            "/usr/bin/stockfish",
            "/usr/games/stockfish",
        ] {
            let path = Path::new(fallback);
            if path.is_file() {
                return Ok(path.to_path_buf());
            }
        }
        Err(Error::EngineNotFound)
    }

    pub async fn spawn(path: &Path, depth: u32, reply_timeout: Duration) -> Result<Self> {
        let mut child = Command::new(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(Error::EngineSpawn)?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::EngineProtocol("engine has no stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::EngineProtocol("engine has no stdout".into()))?;
        let reader = BufReader::new(stdout).lines();

        let mut engine = Self {
            child,
            stdin,
            reader,
            depth,
            reply_timeout,
            multipv: 1,
        };
        engine.send("uci").await?;
        engine.expect_token("uciok").await?;
        engine.send("setoption name Threads value 2").await?;
        engine.send("setoption name Hash value 128").await?;
        engine.send("isready").await?;
        engine.expect_token("readyok").await?;
        debug!("engine ready: {:?}, depth {}", path, depth);
        Ok(engine)
    }

    pub async fn quit(mut self) -> Result<()> {
        self.send("quit").await?;
        let _ = timeout(Duration::from_secs(2), self.child.wait()).await;
        Ok(())
    }

    async fn send(&mut self, command: &str) -> Result<()> {
        trace!("engine << {}", command);
        let write_err = |e: std::io::Error| Error::EngineProtocol(format!("write failed: {}", e));
        self.stdin
            .write_all(command.as_bytes())
            .await
            .map_err(write_err)?;
        self.stdin.write_all(b"\n").await.map_err(write_err)?;
        self.stdin.flush().await.map_err(write_err)?;
        Ok(())
    }

    async fn next_line(&mut self) -> Result<String> {
        match self.reader.next_line().await {
            Ok(Some(line)) => {
                trace!("engine >> {}", line);
                Ok(line)
            }
            Ok(None) => Err(Error::EngineProtocol("engine closed its output".into())),
            Err(e) => Err(Error::EngineProtocol(format!("read failed: {}", e))),
        }
    }

    /// Waits for a bare protocol token such as `uciok`, under the reply
    /// timeout.
    async fn expect_token(&mut self, token: &str) -> Result<()> {
        let deadline = self.reply_timeout;
        match timeout(deadline, async {
            loop {
                if self.next_line().await? == token {
                    return Ok(());
                }
            }
        })
        .await
        {
            Ok(result) => result,
            Err(_) => Err(Error::EngineTimeout(deadline)),
        }
    }

    async fn set_multipv(&mut self, count: usize) -> Result<()> {
        if count != self.multipv {
            self.send(&format!("setoption name MultiPV value {}", count))
                .await?;
            self.multipv = count;
        }
        Ok(())
    }

    /// Issues one search and collects the deepest info line per multipv
    /// slot plus the concluding bestmove, all under the reply timeout.
    async fn search(
        &mut self,
        fen: &str,
        count: usize,
    ) -> Result<(Vec<EngineCandidate>, Option<String>)> {
        self.set_multipv(count).await?;
        self.send(&format!("position fen {}", fen)).await?;
        self.send(&format!("go depth {}", self.depth)).await?;

        match timeout(self.reply_timeout, self.collect_search(count)).await {
            Ok(result) => result,
            Err(_) => {
                warn!("engine search timed out after {:?}", self.reply_timeout);
                self.stop_and_drain().await;
                Err(Error::EngineTimeout(self.reply_timeout))
            }
        }
    }

    async fn collect_search(
        &mut self,
        count: usize,
    ) -> Result<(Vec<EngineCandidate>, Option<String>)> {
        let mut slots: Vec<Option<(u32, EngineCandidate)>> = vec![None; count];
        loop {
            let line = self.next_line().await?;
            if let Some(rest) = line.strip_prefix("bestmove") {
                let best = rest
                    .split_whitespace()
                    .next()
                    .filter(|m| *m != "(none)")
                    .map(str::to_string);
                let candidates = slots
                    .into_iter()
                    .flatten()
                    .map(|(_, candidate)| candidate)
                    .collect();
                return Ok((candidates, best));
            }
            let Some(info) = parse_info_line(&line) else {
                continue;
            };
            let slot = info.multipv.saturating_sub(1);
            if slot >= count {
                continue;
            }
            let deeper = slots[slot]
                .as_ref()
                .map(|(depth, _)| info.depth >= *depth)
                .unwrap_or(true);
            if deeper {
                slots[slot] = Some((info.depth, info.candidate));
            }
        }
    }

    /// Best-effort recovery after a timed-out search: ask the engine to
    /// stop and swallow its output up to the pending bestmove.
    async fn stop_and_drain(&mut self) {
        if self.send("stop").await.is_err() {
            return;
        }
        let _ = timeout(Duration::from_secs(1), async {
            loop {
                match self.next_line().await {
                    Ok(line) if line.starts_with("bestmove") => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;
    }
}

impl Engine for UciEngine {
    fn top_moves(
        &mut self,
        fen: &str,
        count: usize,
    ) -> impl Future<Output = Result<Vec<EngineCandidate>>> + Send {
        async move {
            let (candidates, _) = self.search(fen, count).await?;
            Ok(candidates)
        }
    }

    fn best_move(&mut self, fen: &str) -> impl Future<Output = Result<Option<String>>> + Send {
        async move {
            let (_, best) = self.search(fen, 1).await?;
            Ok(best)
        }
    }
}

struct InfoLine {
    multipv: usize,
    depth: u32,
    candidate: EngineCandidate,
}

/// Parses one `info ... score ... pv ...` line. Lines without both a
/// score and a principal variation (`info string`, currmove traffic)
/// yield `None`.
fn parse_info_line(line: &str) -> Option<InfoLine> {
    if !line.starts_with("info") {
        return None;
    }
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let mut multipv = 1usize;
    let mut depth = 0u32;
    let mut eval_cp: Option<i32> = None;
    let mut mv: Option<&str> = None;

    let mut i = 1;
    while i < tokens.len() {
        match tokens[i] {
            "depth" => {
                depth = tokens.get(i + 1)?.parse().ok()?;
                i += 2;
            }
            "multipv" => {
                multipv = tokens.get(i + 1)?.parse().ok()?;
                i += 2;
            }
            "score" => match (tokens.get(i + 1), tokens.get(i + 2)) {
                (Some(&"cp"), Some(value)) => {
                    eval_cp = value.parse().ok();
                    i += 3;
                }
                (Some(&"mate"), Some(value)) => {
                    let plies: i32 = value.parse().ok()?;
                    eval_cp = Some(plies.signum() * (MATE_SCORE - plies.abs()));
                    i += 3;
                }
                _ => return None,
            },
            "pv" => {
                mv = tokens.get(i + 1).copied();
                break;
            }
            _ => i += 1,
        }
    }

    Some(InfoLine {
        multipv,
        depth,
        candidate: EngineCandidate {
            mv: mv?.to_string(),
            eval_cp: eval_cp?,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_multipv_info_line() {
        let line = "info depth 20 seldepth 30 multipv 2 score cp -35 nodes 123456 nps 100000 time 1234 pv e7e5 g1f3 b8c6";
        let info = parse_info_line(line).unwrap();
        assert_eq!(info.multipv, 2);
        assert_eq!(info.depth, 20);
        assert_eq!(info.candidate.mv, "e7e5");
        assert_eq!(info.candidate.eval_cp, -35);
    }

    #[test]
    fn multipv_defaults_to_one() {
        let info = parse_info_line("info depth 12 score cp 48 pv e2e4").unwrap();
        assert_eq!(info.multipv, 1);
        assert_eq!(info.candidate.eval_cp, 48);
    }

    #[test]
    fn mate_scores_fold_onto_centipawns() {
        let ours = parse_info_line("info depth 18 score mate 3 pv d1h5").unwrap();
        assert_eq!(ours.candidate.eval_cp, 9_997);
        let theirs = parse_info_line("info depth 18 score mate -2 pv g8f6").unwrap();
        assert_eq!(theirs.candidate.eval_cp, -9_998);
        let faster = parse_info_line("info depth 18 score mate 1 pv a1a2").unwrap();
        assert!(faster.candidate.eval_cp > ours.candidate.eval_cp);
    }

    #[test]
    fn ignores_lines_without_score_or_pv() {
        assert!(parse_info_line("info string NNUE evaluation enabled").is_none());
        assert!(parse_info_line("info depth 5 currmove e2e4 currmovenumber 1").is_none());
        assert!(parse_info_line("bestmove e2e4").is_none());
    }

    #[test]
    fn missing_explicit_binary_is_reported() {
        let missing = Path::new("/nonexistent/engine-binary");
        assert!(matches!(
            UciEngine::find_binary(Some(missing)),
            Err(Error::EngineNotFound)
        ));
    }
}
