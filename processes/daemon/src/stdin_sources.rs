//! Concrete [`ChainSyncSource`]/[`MempoolSource`] implementations that read
//! newline-delimited JSON from stdin. The upstream network protocol client
//! itself is out of scope (spec's "abstracted away" collaborator); this
//! gives the standalone binary a working default so `relay_daemon` is
//! runnable end-to-end by piping a recorded or synthetic event stream in,
//! while an embedding host can still supply its own source by constructing
//! `ChainSyncInputPlugin`/`MempoolInputPlugin` directly.

use async_trait::async_trait;
use relay_input_chain_sync::source::{ChainSyncSource, ChainSyncUpdate};
use relay_input_mempool::source::{MempoolSource, RawMempoolTx};
use tokio::io::{AsyncBufReadExt, BufReader, Stdin};

pub struct StdinChainSyncSource {
    lines: tokio::io::Lines<BufReader<Stdin>>,
}

impl StdinChainSyncSource {
    pub fn new() -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines() }
    }
}

impl Default for StdinChainSyncSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChainSyncSource for StdinChainSyncSource {
    async fn next(&mut self) -> anyhow::Result<ChainSyncUpdate> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return std::future::pending().await;
            };
            if line.trim().is_empty() {
                continue;
            }
            return Ok(serde_json::from_str(&line)?);
        }
    }
}

pub struct StdinMempoolSource {
    lines: tokio::io::Lines<BufReader<Stdin>>,
}

impl StdinMempoolSource {
    pub fn new() -> Self {
        Self { lines: BufReader::new(tokio::io::stdin()).lines() }
    }
}

impl Default for StdinMempoolSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MempoolSource for StdinMempoolSource {
    async fn snapshot(&mut self) -> anyhow::Result<Vec<RawMempoolTx>> {
        let Some(line) = self.lines.next_line().await? else {
            return Ok(Vec::new());
        };
        if line.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&line)?)
    }
}
