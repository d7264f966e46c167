//! The gossip server: version handshake, inventory exchange, block and
//! transaction relay, and the mining loop.
//!
//! One accept loop; every inbound connection is handled on its own task.
//! A connection carries exactly one message, read to EOF; replies travel on
//! fresh connections to the originating address. Handlers share the chain
//! store and UTXO set plus the mutex-guarded mempool, peer list, and
//! blocks-in-transit list.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{info, warn};

use cobre_core::constants::{MIN_TXS_TO_MINE, PROTOCOL_VERSION};
use cobre_core::error::{CobreError, NetworkError};
use cobre_core::mempool::Mempool;
use cobre_core::types::{Block, Hash256, Transaction};
use cobre_network::protocol::{
    AddrPayload, BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message,
    TxPayload, VersionPayload,
};

use crate::config::NodeConfig;
use crate::storage::Blockchain;
use crate::utxo::UtxoSet;

/// Dial `addr`, write one framed message, and half-close.
///
/// Used by the server's peer bookkeeping and by one-shot senders such as
/// the CLI forwarding a transaction to the bootstrap node.
pub async fn send_to_peer(addr: &str, message: &Message) -> Result<(), CobreError> {
    let frame = message.encode()?;
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|_| NetworkError::PeerUnreachable(addr.to_string()))?;
    stream
        .write_all(&frame)
        .await
        .map_err(|_| NetworkError::PeerUnreachable(addr.to_string()))?;
    stream.shutdown().await.ok();
    Ok(())
}

/// Shared state of a running node.
pub struct Server {
    node_address: String,
    mining_address: Option<String>,
    utxo: UtxoSet,
    mempool: Mutex<Mempool>,
    known_nodes: Mutex<Vec<String>>,
    blocks_in_transit: Mutex<Vec<Hash256>>,
}

impl Server {
    pub fn new(config: &NodeConfig, chain: Arc<Blockchain>) -> Arc<Self> {
        Arc::new(Self {
            node_address: config.node_address(),
            mining_address: config.mining_addr.clone(),
            utxo: UtxoSet::new(chain),
            mempool: Mutex::new(Mempool::new()),
            known_nodes: Mutex::new(vec![config.bootstrap_addr.clone()]),
            blocks_in_transit: Mutex::new(Vec::new()),
        })
    }

    pub fn node_address(&self) -> &str {
        &self.node_address
    }

    pub fn chain(&self) -> &Arc<Blockchain> {
        self.utxo.chain()
    }

    pub fn utxo(&self) -> &UtxoSet {
        &self.utxo
    }

    fn bootstrap(&self) -> Option<String> {
        self.known_nodes.lock().first().cloned()
    }

    /// The first known node is the relay hub.
    fn is_bootstrap(&self) -> bool {
        self.bootstrap().as_deref() == Some(self.node_address.as_str())
    }

    /// Bind the listener and serve connections until the task is dropped.
    ///
    /// Non-bootstrap nodes open the version handshake with the seed peer
    /// before accepting.
    pub async fn run(self: Arc<Self>) -> Result<(), CobreError> {
        let listener =
            TcpListener::bind(&self.node_address)
                .await
                .map_err(|e| NetworkError::Bind {
                    addr: self.node_address.clone(),
                    reason: e.to_string(),
                })?;
        info!(addr = %self.node_address, mining = self.mining_address.is_some(), "node listening");

        if !self.is_bootstrap() {
            if let Some(seed) = self.bootstrap() {
                self.send_version(&seed).await;
            }
        }

        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let server = Arc::clone(&self);
                    tokio::spawn(async move {
                        server.handle_connection(stream).await;
                    });
                }
                Err(e) => warn!(%e, "accept failed"),
            }
        }
    }

    /// Read one message to EOF and dispatch it.
    async fn handle_connection(&self, mut stream: TcpStream) {
        let mut frame = Vec::new();
        if let Err(e) = stream.read_to_end(&mut frame).await {
            warn!(%e, "failed to read request");
            return;
        }

        let message = match Message::decode(&frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(%e, "dropping undecodable message");
                return;
            }
        };

        info!(command = message.command(), "received command");
        let result = match message {
            Message::Version(p) => self.handle_version(p).await,
            Message::Addr(p) => self.handle_addr(p).await,
            Message::GetBlocks(p) => self.handle_get_blocks(p).await,
            Message::Inv(p) => self.handle_inv(p).await,
            Message::GetData(p) => self.handle_get_data(p).await,
            Message::Block(p) => self.handle_block(p).await,
            Message::Tx(p) => self.handle_tx(p).await,
        };
        if let Err(e) = result {
            warn!(%e, "handler failed");
        }
    }

    // --- Outbound ---

    /// Send, dropping the peer from the known set when unreachable.
    async fn send_message(&self, addr: &str, message: &Message) {
        if let Err(e) = send_to_peer(addr, message).await {
            warn!(addr, %e, "dropping unreachable peer");
            self.known_nodes.lock().retain(|node| node != addr);
        }
    }

    async fn send_version(&self, addr: &str) {
        let best_height = match self.chain().get_best_height() {
            Ok(height) => height,
            Err(e) => {
                warn!(%e, "cannot read best height");
                return;
            }
        };
        let message = Message::Version(VersionPayload {
            version: PROTOCOL_VERSION,
            best_height,
            addr_from: self.node_address.clone(),
        });
        self.send_message(addr, &message).await;
    }

    async fn send_get_blocks(&self, addr: &str) {
        let message = Message::GetBlocks(GetBlocksPayload {
            addr_from: self.node_address.clone(),
        });
        self.send_message(addr, &message).await;
    }

    async fn send_get_data(&self, addr: &str, kind: InvKind, id: Hash256) {
        let message = Message::GetData(GetDataPayload {
            addr_from: self.node_address.clone(),
            kind,
            id,
        });
        self.send_message(addr, &message).await;
    }

    async fn send_inv(&self, addr: &str, kind: InvKind, items: Vec<Hash256>) {
        let message = Message::Inv(InvPayload {
            addr_from: self.node_address.clone(),
            kind,
            items,
        });
        self.send_message(addr, &message).await;
    }

    // --- Handlers ---

    /// Height comparison drives synchronization: the lower side asks for
    /// blocks, the higher side re-advertises itself. Unknown peers are
    /// added to the known set either way.
    pub async fn handle_version(&self, payload: VersionPayload) -> Result<(), CobreError> {
        let my_height = self.chain().get_best_height()?;
        if my_height < payload.best_height {
            self.send_get_blocks(&payload.addr_from).await;
        } else if my_height > payload.best_height {
            self.send_version(&payload.addr_from).await;
        }

        let mut nodes = self.known_nodes.lock();
        if !nodes.contains(&payload.addr_from) {
            nodes.push(payload.addr_from);
        }
        Ok(())
    }

    /// Accumulate advertised peers and re-request blocks from everyone.
    pub async fn handle_addr(&self, payload: AddrPayload) -> Result<(), CobreError> {
        {
            let mut nodes = self.known_nodes.lock();
            for addr in payload.addr_list {
                if !nodes.contains(&addr) {
                    nodes.push(addr);
                }
            }
            info!(count = nodes.len(), "known nodes updated");
        }

        let nodes = self.known_nodes.lock().clone();
        for node in nodes {
            self.send_get_blocks(&node).await;
        }
        Ok(())
    }

    /// Reply with the full tip-first block-hash inventory.
    pub async fn handle_get_blocks(&self, payload: GetBlocksPayload) -> Result<(), CobreError> {
        let hashes = self.chain().get_block_hashes()?;
        self.send_inv(&payload.addr_from, InvKind::Block, hashes).await;
        Ok(())
    }

    /// Track announced blocks and fetch them one at a time; fetch unknown
    /// transactions.
    pub async fn handle_inv(&self, payload: InvPayload) -> Result<(), CobreError> {
        info!(count = payload.items.len(), kind = ?payload.kind, "received inventory");
        match payload.kind {
            InvKind::Block => {
                let Some((first, rest)) = payload.items.split_first() else {
                    return Ok(());
                };
                *self.blocks_in_transit.lock() = rest.to_vec();
                self.send_get_data(&payload.addr_from, InvKind::Block, *first).await;
            }
            InvKind::Tx => {
                let Some(&txid) = payload.items.first() else {
                    return Ok(());
                };
                let pooled = self.mempool.lock().contains(&txid);
                if !pooled {
                    self.send_get_data(&payload.addr_from, InvKind::Tx, txid).await;
                }
            }
        }
        Ok(())
    }

    /// Serve a block from the store or a transaction from the mempool.
    pub async fn handle_get_data(&self, payload: GetDataPayload) -> Result<(), CobreError> {
        match payload.kind {
            InvKind::Block => {
                let Ok(block) = self.chain().get_block(&payload.id) else {
                    warn!(id = %payload.id, "requested block not found");
                    return Ok(());
                };
                let message = Message::Block(BlockPayload {
                    addr_from: self.node_address.clone(),
                    block: block.serialize()?,
                });
                self.send_message(&payload.addr_from, &message).await;
            }
            InvKind::Tx => {
                let Some(tx) = self.mempool.lock().get(&payload.id).cloned() else {
                    warn!(id = %payload.id, "requested transaction not pooled");
                    return Ok(());
                };
                let message = Message::Tx(TxPayload {
                    addr_from: self.node_address.clone(),
                    transaction: tx.serialize().map_err(CobreError::from)?,
                });
                self.send_message(&payload.addr_from, &message).await;
            }
        }
        Ok(())
    }

    /// Append a received block, then either continue draining the
    /// in-transit list or refresh the UTXO set.
    ///
    /// The trailing reindex rebuilds from the tip and so repairs any gap
    /// the single-block update could not cover.
    pub async fn handle_block(&self, payload: BlockPayload) -> Result<(), CobreError> {
        let block = Block::deserialize(&payload.block)?;
        self.chain().add_block(&block)?;
        info!(hash = %block.hash, height = block.height, "received block");

        let next = {
            let mut transit = self.blocks_in_transit.lock();
            if transit.is_empty() {
                None
            } else {
                Some(transit.remove(0))
            }
        };

        match next {
            Some(hash) => self.send_get_data(&payload.addr_from, InvKind::Block, hash).await,
            None => {
                if let Err(e) = self.utxo.update(&block) {
                    warn!(%e, "utxo update failed; rebuilding");
                }
                self.utxo.reindex()?;
            }
        }
        Ok(())
    }

    /// Pool a received transaction; the bootstrap node relays it, a mining
    /// node checks the mining trigger.
    pub async fn handle_tx(&self, payload: TxPayload) -> Result<(), CobreError> {
        let tx = Transaction::deserialize(&payload.transaction).map_err(CobreError::from)?;
        let txid = tx.id;
        self.mempool.lock().insert(tx);
        info!(%txid, "pooled transaction");

        if self.is_bootstrap() {
            let nodes = self.known_nodes.lock().clone();
            for node in nodes {
                if node != self.node_address && node != payload.addr_from {
                    self.send_inv(&node, InvKind::Tx, vec![txid]).await;
                }
            }
        } else if self.mining_address.is_some()
            && self.mempool.lock().len() >= MIN_TXS_TO_MINE
        {
            self.mine_pending().await?;
        }
        Ok(())
    }

    /// Mine pooled transactions until the pool drains.
    ///
    /// Each round takes every pooled transaction that verifies against the
    /// current chain, appends a coinbase for the mining address, mines, and
    /// advertises the new block to every other known node.
    async fn mine_pending(&self) -> Result<(), CobreError> {
        let Some(mining_address) = self.mining_address.clone() else {
            return Ok(());
        };

        loop {
            let candidates = self.mempool.lock().transactions();
            let mut txs = Vec::new();
            for tx in candidates {
                match self.chain().verify_transaction(&tx) {
                    Ok(true) => txs.push(tx),
                    Ok(false) => warn!(txid = %tx.id, "invalid signature, skipping"),
                    Err(e) => warn!(txid = %tx.id, %e, "cannot verify, skipping"),
                }
            }
            if txs.is_empty() {
                info!("all pooled transactions are invalid, waiting for new ones");
                return Ok(());
            }

            txs.insert(0, Transaction::new_coinbase(&mining_address, "")?);
            let block = self.chain().mine_block(txs)?;
            self.utxo.reindex()?;
            info!(hash = %block.hash, height = block.height, "mined block from mempool");

            {
                let mut pool = self.mempool.lock();
                for tx in &block.transactions {
                    pool.remove(&tx.id);
                }
            }

            let nodes = self.known_nodes.lock().clone();
            for node in nodes {
                if node != self.node_address {
                    self.send_inv(&node, InvKind::Block, vec![block.hash]).await;
                }
            }

            if self.mempool.lock().is_empty() {
                return Ok(());
            }
        }
    }
}
