//! Binary metadata and the chunked payload transfer protocol
//!
//! Payload layout inside a large object:
//! ```text
//! frame k at offset k * FRAME_SIZE:
//!   seal_segment(object_id, generation, k, plaintext[k * CHUNK_SIZE ..][.. CHUNK_SIZE])
//! ```
//! Every frame but the last seals exactly [`CHUNK_SIZE`] bytes. The last frame
//! seals fewer (possibly zero) and marks the end, so an empty upload still
//! leaves one frame and is distinguishable from an object never written.
//!
//! Uploads are written into a private staging object and swapped onto the
//! target only when the client closes the stream cleanly. The staging id
//! becomes the target's generation, so a download that straddles a
//! replacement sees the generation change and aborts instead of mixing
//! content from two uploads. A staging object that is never swapped in is
//! released, including when the client disconnects mid-stream.

use std::sync::Arc;

use futures::{Stream, StreamExt};
use keeper_core::proto::{
    BinaryDownloadChunk, BinaryReadResponse, BinaryUpdateRequest, BinaryUpdateResponse,
    BinaryUploadChunk, BinaryUploadResponse, BinaryWriteRequest, BinaryWriteResponse, NameList,
};
use keeper_core::{UserId, CHUNK_SIZE};
use keeper_crypto::sealed_len;
use keeper_storage::{BinaryRecord, ObjectChunk, Storage, StorageError, BINARIES};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tonic::Status;
use tracing::{debug, error, info, warn};

use super::entity::{open_field, seal_fields};
use super::AppContext;
use crate::error::ServiceError;
use crate::validate::Validate;

/// Stored size of one full sealed frame
pub const FRAME_SIZE: usize = sealed_len(CHUNK_SIZE);

const DOWNLOAD_BUFFER: usize = 4;

pub type DownloadStream = ReceiverStream<Result<BinaryDownloadChunk, Status>>;

pub struct BinaryHandler<S> {
    ctx: Arc<AppContext<S>>,
}

impl<S: Storage> BinaryHandler<S> {
    pub fn new(ctx: Arc<AppContext<S>>) -> Self {
        Self { ctx }
    }

    pub async fn list(&self, user: &UserId) -> Result<NameList, ServiceError> {
        let names = self.ctx.store.list(&BINARIES, user.as_str()).await?;
        Ok(NameList { names })
    }

    /// Store metadata and allocate the (empty) payload object in one step.
    pub async fn write(
        &self,
        user: &UserId,
        write: BinaryWriteRequest,
    ) -> Result<BinaryWriteResponse, ServiceError> {
        let record = self.record(user, 0, 0, write)?;
        let (id, bin_id) = self.ctx.store.binary_write(&record).await?;
        debug!(user = %user, id, bin_id, "binary created");
        Ok(BinaryWriteResponse { id, bin_id })
    }

    pub async fn read(&self, user: &UserId, name: &str) -> Result<BinaryReadResponse, ServiceError> {
        let record = self.ctx.store.binary_read(user.as_str(), name).await?;
        Ok(BinaryReadResponse {
            id: record.id,
            name: record.name,
            notes: open_field(&self.ctx.cipher, &record.notes)?,
            size: record.size,
            bin_id: record.bin_id,
        })
    }

    /// `bin_id == 0` keeps the payload; the record's current object id resets it.
    pub async fn update(
        &self,
        user: &UserId,
        update: BinaryUpdateRequest,
    ) -> Result<BinaryUpdateResponse, ServiceError> {
        let write = update
            .write
            .ok_or_else(|| ServiceError::invalid("write is required"))?;
        let record = self.record(user, update.id, update.bin_id, write)?;
        let bin_id = self.ctx.store.binary_update(&record).await?;
        debug!(user = %user, id = update.id, bin_id, "binary updated");
        Ok(BinaryUpdateResponse { bin_id })
    }

    pub async fn delete(&self, user: &UserId, name: &str) -> Result<(), ServiceError> {
        self.ctx.store.binary_delete(user.as_str(), name).await?;
        debug!(user = %user, "binary deleted");
        Ok(())
    }

    fn record(
        &self,
        user: &UserId,
        id: i64,
        bin_id: i64,
        write: BinaryWriteRequest,
    ) -> Result<BinaryRecord, ServiceError> {
        let mut sealed = seal_fields(&self.ctx.cipher, &[write.notes])?;
        Ok(BinaryRecord {
            id,
            user_id: user.as_str().to_owned(),
            name: write.name,
            size: write.size,
            notes: sealed.remove(0),
            bin_id,
        })
    }

    /// Receive a payload. Every message must name the same object, which must
    /// back one of the caller's binaries. Returns the plaintext byte count.
    pub async fn upload<St>(&self, user: &UserId, mut stream: St) -> Result<BinaryUploadResponse, ServiceError>
    where
        St: Stream<Item = Result<BinaryUploadChunk, Status>> + Unpin + Send,
    {
        let first = match stream.next().await {
            Some(msg) => msg.map_err(ServiceError::Stream)?,
            None => return Err(ServiceError::invalid("upload stream carried no messages")),
        };
        first.validate()?;
        let target = first.bin_id;

        if !self.ctx.store.object_owned_by(user.as_str(), target).await? {
            return Err(ServiceError::NotFound);
        }

        let staging = Staging {
            store: self.ctx.store.clone(),
            id: self.ctx.store.allocate_object().await?,
            armed: true,
        };
        let total = self.copy_into(target, staging.id, first, &mut stream).await?;
        self.ctx.store.replace_object(target, staging.id).await?;
        staging.committed();

        self.ctx.metrics.add_upload_bytes(total);
        info!(user = %user, bin_id = target, bytes = total, "upload complete");
        Ok(BinaryUploadResponse { size: total as i64 })
    }

    /// Re-segment the incoming chunks into sealed frames written to `staging`.
    /// Frames are sealed under generation `staging`.
    async fn copy_into<St>(
        &self,
        target: i64,
        staging: i64,
        first: BinaryUploadChunk,
        stream: &mut St,
    ) -> Result<u64, ServiceError>
    where
        St: Stream<Item = Result<BinaryUploadChunk, Status>> + Unpin + Send,
    {
        let mut pending: Vec<u8> = Vec::with_capacity(2 * CHUNK_SIZE);
        let mut index: u64 = 0;
        let mut total: u64 = 0;

        let mut next = Some(first);
        while let Some(msg) = next {
            if msg.bin_id != target {
                return Err(ServiceError::invalid(
                    "every upload message must carry the same bin_id",
                ));
            }
            total += msg.chunk.len() as u64;
            pending.extend_from_slice(&msg.chunk);

            while pending.len() >= CHUNK_SIZE {
                let rest = pending.split_off(CHUNK_SIZE);
                let segment = std::mem::replace(&mut pending, rest);
                self.put_frame(target, staging, index, &segment).await?;
                index += 1;
            }

            next = match stream.next().await {
                Some(msg) => Some(msg.map_err(ServiceError::Stream)?),
                None => None,
            };
        }

        // Terminating short frame, possibly empty
        self.put_frame(target, staging, index, &pending).await?;
        Ok(total)
    }

    async fn put_frame(
        &self,
        target: i64,
        staging: i64,
        index: u64,
        plaintext: &[u8],
    ) -> Result<(), ServiceError> {
        let frame = self.ctx.cipher.seal_segment(target, staging, index, plaintext)?;
        let offset = frame_offset(index)?;
        self.ctx.store.put_chunk(staging, offset, &frame).await?;
        Ok(())
    }

    /// Stream a payload back in plaintext chunks of at most [`CHUNK_SIZE`].
    /// An object with no data at all is `NotFound`.
    pub async fn download(&self, user: &UserId, bin_id: i64) -> Result<DownloadStream, ServiceError> {
        if !self.ctx.store.object_owned_by(user.as_str(), bin_id).await? {
            return Err(ServiceError::NotFound);
        }
        let first = self.ctx.store.get_object_chunk(bin_id, 0, FRAME_SIZE).await?;
        if first.bytes.is_empty() {
            return Err(ServiceError::NotFound);
        }

        let (tx, rx) = mpsc::channel(DOWNLOAD_BUFFER);
        let ctx = self.ctx.clone();
        let user = user.clone();
        tokio::spawn(async move {
            match send_frames(&ctx, bin_id, first, &tx).await {
                Ok(total) => {
                    ctx.metrics.add_download_bytes(total);
                    info!(user = %user, bin_id, bytes = total, "download complete");
                }
                Err(SendError::ClientGone) => {
                    debug!(user = %user, bin_id, "download abandoned by client");
                }
                Err(SendError::Service(e)) => {
                    let _ = tx.send(Err(e.into())).await;
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }
}

/// Staging object of an upload in progress. Released on drop unless the
/// upload was committed.
struct Staging<S: Storage> {
    store: Arc<S>,
    id: i64,
    armed: bool,
}

impl<S: Storage> Staging<S> {
    fn committed(mut self) {
        self.armed = false;
    }
}

impl<S: Storage> Drop for Staging<S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let store = self.store.clone();
        let staging = self.id;
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(staging, "no runtime to release staging object; left for the startup sweep");
            return;
        };
        runtime.spawn(async move {
            match store.release_object(staging).await {
                Ok(()) => debug!(staging, "staging object released"),
                Err(StorageError::NotFound) => {}
                Err(e) => warn!(staging, error = %e, "failed to release staging object"),
            }
        });
    }
}

enum SendError {
    ClientGone,
    Service(ServiceError),
}

impl From<ServiceError> for SendError {
    fn from(e: ServiceError) -> Self {
        SendError::Service(e)
    }
}

async fn send_frames<S: Storage>(
    ctx: &AppContext<S>,
    bin_id: i64,
    first: ObjectChunk,
    tx: &mpsc::Sender<Result<BinaryDownloadChunk, Status>>,
) -> Result<u64, SendError> {
    let generation = first.generation;
    let mut frame = first.bytes;
    let mut index: u64 = 0;
    let mut total: u64 = 0;

    loop {
        let chunk = ctx
            .cipher
            .open_segment(bin_id, generation, index, &frame)
            .map_err(ServiceError::from)?;
        let last = chunk.len() < CHUNK_SIZE;
        total += chunk.len() as u64;

        if !chunk.is_empty() && tx.send(Ok(BinaryDownloadChunk { chunk })).await.is_err() {
            return Err(SendError::ClientGone);
        }
        if last {
            return Ok(total);
        }

        index += 1;
        let next = ctx
            .store
            .get_object_chunk(bin_id, frame_offset(index)?, FRAME_SIZE)
            .await
            .map_err(ServiceError::from)?;
        if next.generation != generation {
            warn!(bin_id, index, "payload replaced during download");
            return Err(ServiceError::Aborted("payload replaced during download".into()).into());
        }
        if next.bytes.is_empty() {
            error!(bin_id, index, "payload ended without a terminating frame");
            return Err(ServiceError::Internal("truncated payload".into()).into());
        }
        frame = next.bytes;
    }
}

fn frame_offset(index: u64) -> Result<i64, ServiceError> {
    index
        .checked_mul(FRAME_SIZE as u64)
        .and_then(|o| i64::try_from(o).ok())
        .ok_or_else(|| ServiceError::Internal(format!("frame {index} out of range")))
}
