//! Pull endpoint serving pre-serialized scene blobs.
//!
//! A peer connects, sends an ASCII command such as `objects` and receives the
//! matching blob. Unknown commands and missing blobs get an empty reply. The
//! blobs are opaque here; extracting them from a host scene is someone else's
//! job.

use crate::transport::{read_message, write_message, MAX_REQUEST};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

/// Blob categories a peer can request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlobKind {
    /// Scene header.
    Header,
    /// Scene graph nodes.
    Nodes,
    /// Mesh geometry.
    Objects,
    /// Materials.
    Materials,
    /// Texture images.
    Textures,
    /// Skinned characters.
    Characters,
}

impl BlobKind {
    /// Every kind, in request order used by receivers.
    pub const ALL: [BlobKind; 6] = [
        BlobKind::Header,
        BlobKind::Nodes,
        BlobKind::Objects,
        BlobKind::Materials,
        BlobKind::Textures,
        BlobKind::Characters,
    ];

    /// Command string naming this kind.
    pub fn command(self) -> &'static str {
        match self {
            BlobKind::Header => "header",
            BlobKind::Nodes => "nodes",
            BlobKind::Objects => "objects",
            BlobKind::Materials => "materials",
            BlobKind::Textures => "textures",
            BlobKind::Characters => "characters",
        }
    }
}

impl fmt::Display for BlobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

impl FromStr for BlobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches('\0').trim();
        BlobKind::ALL
            .into_iter()
            .find(|kind| kind.command() == s)
            .ok_or_else(|| format!("unknown blob request {s:?}"))
    }
}

/// Source of blob payloads.
pub trait SceneBlobProvider: Send + Sync {
    /// Bytes for `kind`, or `None` when unavailable.
    fn blob(&self, kind: BlobKind) -> Option<Vec<u8>>;
}

/// In-memory blob store.
#[derive(Debug, Clone, Default)]
pub struct SceneBlobs {
    blobs: HashMap<BlobKind, Vec<u8>>,
}

impl SceneBlobs {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the bytes served for `kind`.
    pub fn insert(&mut self, kind: BlobKind, bytes: Vec<u8>) {
        self.blobs.insert(kind, bytes);
    }

    /// Number of kinds with a blob.
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether no blob is stored.
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Load `<dir>/<kind>` (or `<dir>/<kind>.bin`) for every kind that exists.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut blobs = Self::new();
        for kind in BlobKind::ALL {
            let plain = dir.join(kind.command());
            let path = if plain.is_file() {
                plain
            } else {
                dir.join(format!("{}.bin", kind.command()))
            };
            if !path.is_file() {
                debug!(%kind, "no blob file");
                continue;
            }
            let bytes = std::fs::read(&path)
                .with_context(|| format!("Failed to read blob {}", path.display()))?;
            info!("Loaded {} blob ({} bytes)", kind, bytes.len());
            blobs.insert(kind, bytes);
        }
        Ok(blobs)
    }
}

impl SceneBlobProvider for SceneBlobs {
    fn blob(&self, kind: BlobKind) -> Option<Vec<u8>> {
        self.blobs.get(&kind).cloned()
    }
}

/// TCP request/reply server for scene blobs.
pub struct DistributionServer {
    listener: TcpListener,
}

impl DistributionServer {
    /// Bind the distribution port.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind distribution server on {addr}"))?;
        info!("Distribution server bound to {}", listener.local_addr()?);
        Ok(Self { listener })
    }

    /// Bound address.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is aborted.
    pub async fn serve(self, provider: Arc<dyn SceneBlobProvider>) {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    debug!(%peer, "distribution client connected");
                    let provider = Arc::clone(&provider);
                    tokio::spawn(async move {
                        if let Err(err) = answer(stream, provider.as_ref()).await {
                            warn!(%peer, %err, "distribution connection failed");
                        }
                    });
                }
                Err(err) => warn!(%err, "accept failed"),
            }
        }
    }
}

/// Reply to requests on one connection until the peer hangs up.
async fn answer(mut stream: TcpStream, provider: &dyn SceneBlobProvider) -> Result<()> {
    while let Some(request) = read_message(&mut stream, MAX_REQUEST).await? {
        let command = String::from_utf8_lossy(&request);
        let reply = match command.parse::<BlobKind>() {
            Ok(kind) => provider.blob(kind).unwrap_or_default(),
            Err(err) => {
                warn!("{}", err);
                Vec::new()
            }
        };
        debug!(%command, len = reply.len(), "answering request");
        write_message(&mut stream, &reply).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::request;

    #[test]
    fn commands_parse() {
        for kind in BlobKind::ALL {
            assert_eq!(kind.command().parse::<BlobKind>().unwrap(), kind);
        }
        assert_eq!("nodes\0".parse::<BlobKind>().unwrap(), BlobKind::Nodes);
        assert!("meshes".parse::<BlobKind>().is_err());
    }

    #[tokio::test]
    async fn serves_known_blobs_and_empty_replies() {
        let mut blobs = SceneBlobs::new();
        blobs.insert(BlobKind::Header, vec![1, 2, 3]);
        let server = DistributionServer::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let task = tokio::spawn(server.serve(Arc::new(blobs)));

        assert_eq!(request(addr, "header").await.unwrap(), vec![1, 2, 3]);
        assert!(request(addr, "textures").await.unwrap().is_empty());
        assert!(request(addr, "bogus").await.unwrap().is_empty());
        task.abort();
    }
}
