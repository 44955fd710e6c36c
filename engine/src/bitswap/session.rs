//! Driving a single Bitswap wire stream: the receive loop and
//! `GetBlockForRemote`.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bitswap::engine::BitswapEngine;
use crate::bitswap::protocol::{
    decode_message, encode_message, frame, read_frame, Message, ProtocolVersion,
};
use crate::cid::Cid;
use crate::error::{Error, Result};
use crate::external::{PeerId, Stream};
use crate::store::Store;

/// A stream wrapped for concurrent outbound sends: `GetBlockForRemote`
/// tasks spawned from the receive loop each need to write a response
/// independently of the loop's own reads.
#[derive(Clone)]
pub struct SharedStream(Arc<Mutex<Box<dyn Stream>>>);

impl SharedStream {
    /// Wrap a transport stream for shared use across the receive loop
    /// and its spawned response tasks.
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self(Arc::new(Mutex::new(stream)))
    }

    async fn read_frame(&self) -> Result<Option<Bytes>> {
        let mut stream = self.0.lock().await;
        stream.read().await
    }

    async fn write_framed(&self, message: &Message, version: ProtocolVersion) -> Result<()> {
        let encoded = encode_message(message, version);
        let framed = frame(&encoded);
        let mut stream = self.0.lock().await;
        stream.write(framed).await
    }
}

/// Run the receive loop for one stream.
///
/// Assumes the peer identity handshake has already completed (callers
/// drive that through [`crate::external::PeerConnection`] before
/// opening the stream this session is given).
pub async fn receive_loop(
    stream: SharedStream,
    version: ProtocolVersion,
    engine: Arc<BitswapEngine>,
    store: Store,
    peer: PeerId,
) -> Result<()> {
    loop {
        let Some(chunk) = stream.read_frame().await? else {
            break;
        };
        let (record, _consumed) = read_frame(&chunk)?;
        let message = decode_message(record, version)?;

        for entry in &message.wantlist.entries {
            let cid = parse_block_key(&entry.block_key, version)?;
            if entry.cancel {
                engine.unwant(&cid).await;
            } else {
                let stream = stream.clone();
                let engine = engine.clone();
                let store = store.clone();
                let peer = peer.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        get_block_for_remote(&stream, version, &engine, &store, &cid, &peer).await
                    {
                        tracing::debug!(%peer, cid = %cid, error = %err, "get_block_for_remote failed");
                    }
                });
            }
        }

        for block in message.payload {
            if let Err(err) = engine.on_block_received(&peer, &block).await {
                tracing::warn!(%peer, error = %err, "failed to process received block");
            }
        }

        if version.single_message_per_stream() {
            break;
        }
    }
    Ok(())
}

/// Interpret a want-list entry's `block_key` per the protocol version
/// in use: a bare CIDv0 multihash under v1.0, a full CID under v1.1.
fn parse_block_key(block_key: &Bytes, version: ProtocolVersion) -> Result<Cid> {
    match version {
        ProtocolVersion::V1_0 => {
            let (multihash, _) = crate::cid::Multihash::decode(block_key)?;
            Ok(Cid::v0(multihash))
        }
        ProtocolVersion::V1_1 => Cid::from_bytes(block_key).map_err(Error::from),
    }
}

/// If the store already has `cid`, send it; otherwise pull it from the
/// network first via `WantAsync`, then forward. Errors are swallowed
/// by the caller (logged, no response sent).
async fn get_block_for_remote(
    stream: &SharedStream,
    version: ProtocolVersion,
    engine: &BitswapEngine,
    store: &Store,
    cid: &Cid,
    peer: &PeerId,
) -> Result<()> {
    let block = match store.try_get(cid).await? {
        Some(block) => block,
        None => {
            engine
                .want_async(cid.clone(), peer.clone(), CancellationToken::new())
                .await?
        }
    };

    let message = Message::single_block(block.clone());
    stream.write_framed(&message, version).await?;
    engine.on_block_sent(peer, &block).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes as TestBytes;
    use tokio::sync::mpsc;

    use crate::bitswap::engine::BitswapConfig;
    use crate::block::DataBlock;

    /// An in-memory `Stream` pair so the receive loop can be exercised
    /// without real transport plumbing.
    struct ChannelStream {
        rx: mpsc::UnboundedReceiver<Bytes>,
        tx: mpsc::UnboundedSender<Bytes>,
        writes: Arc<AtomicUsize>,
    }

    impl Stream for ChannelStream {
        fn read<'a>(
            &'a mut self,
        ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + 'a>> {
            Box::pin(async move { Ok(self.rx.recv().await) })
        }

        fn write<'a>(
            &'a mut self,
            bytes: Bytes,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            let tx = self.tx.clone();
            let writes = self.writes.clone();
            Box::pin(async move {
                writes.fetch_add(1, Ordering::Relaxed);
                tx.send(bytes).map_err(|_| Error::ProtocolError("closed".into()))
            })
        }
    }

    async fn temp_store() -> (Store, std::path::PathBuf) {
        let path = std::env::temp_dir().join(format!(
            "blockswap-engine-session-test-{}-{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&path).unwrap();
        let store = Store::new(&path);
        store.init().await.unwrap();
        (store, path)
    }

    #[tokio::test]
    async fn receive_loop_serves_block_already_in_store() {
        let (store, path) = temp_store().await;
        let block = DataBlock::new_raw(TestBytes::from_static(b"already have this"));
        store.put(&block).await.unwrap();

        let engine = Arc::new(BitswapEngine::new(store.clone(), &BitswapConfig::default()));
        engine.start().await.unwrap();

        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let writes = Arc::new(AtomicUsize::new(0));
        let stream = SharedStream::new(Box::new(ChannelStream {
            rx: in_rx,
            tx: out_tx,
            writes: writes.clone(),
        }));

        let want_entry = Message::single_want(
            crate::cid::Cid::for_content("raw", block.id.multihash.clone()).to_bytes().into(),
            false,
            true,
        );
        let encoded = encode_message(&want_entry, ProtocolVersion::V1_1);
        in_tx.send(frame(&encoded)).unwrap();
        drop(in_tx);

        let peer = PeerId("remote".into());
        receive_loop(stream, ProtocolVersion::V1_1, engine.clone(), store, peer)
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let response = out_rx.try_recv();
        assert!(response.is_ok());
        std::fs::remove_dir_all(&path).ok();
    }
}
