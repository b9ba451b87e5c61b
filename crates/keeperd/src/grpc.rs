//! tonic gRPC server over TCP
//!
//! Layer order, outermost first: request log, identity. Each method then
//! validates its message and hands it to a handler.

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use keeper_core::proto::{
    keeper_server::{Keeper, KeeperServer},
    *,
};
use keeper_core::UserId;
use keeper_crypto::TokenService;
use keeper_storage::Storage;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tonic::{Request, Response, Status, Streaming};
use tracing::info;

use crate::auth::AuthLayer;
use crate::error::{ServiceError, UNAUTHENTICATED};
use crate::handlers::{
    AccountHandler, AppContext, BinaryHandler, Cards, EntityHandler, Notes, Passwords,
};
use crate::handlers::binary::DownloadStream;
use crate::metrics::Metrics;
use crate::middleware::RequestLogLayer;
use crate::validate::Validate;

/// Implementation of the Keeper gRPC service
pub struct KeeperService<S> {
    account: AccountHandler<S>,
    passwords: EntityHandler<Passwords, S>,
    cards: EntityHandler<Cards, S>,
    notes: EntityHandler<Notes, S>,
    binaries: BinaryHandler<S>,
}

impl<S: Storage> KeeperService<S> {
    pub fn new(ctx: Arc<AppContext<S>>) -> Self {
        Self {
            account: AccountHandler::new(ctx.clone()),
            passwords: EntityHandler::new(ctx.clone()),
            cards: EntityHandler::new(ctx.clone()),
            notes: EntityHandler::new(ctx.clone()),
            binaries: BinaryHandler::new(ctx),
        }
    }
}

/// Identity placed in the extensions by the identity layer.
fn caller<T>(request: &Request<T>) -> Result<UserId, Status> {
    request
        .extensions()
        .get::<UserId>()
        .cloned()
        .ok_or_else(|| Status::unauthenticated(UNAUTHENTICATED))
}

/// Caller identity plus the validated message.
fn authed<T: Validate>(request: Request<T>) -> Result<(UserId, T), Status> {
    let user = caller(&request)?;
    let message = request.into_inner();
    message.validate()?;
    Ok((user, message))
}

fn validated<T: Validate>(request: Request<T>) -> Result<T, Status> {
    let message = request.into_inner();
    message.validate()?;
    Ok(message)
}

fn reply<T>(result: Result<T, ServiceError>) -> Result<Response<T>, Status> {
    result.map(Response::new).map_err(Status::from)
}

/// The `write` payload of an update request. Validation has already
/// rejected a missing one.
fn required<W>(write: Option<W>) -> Result<W, Status> {
    write.ok_or_else(|| Status::invalid_argument("write is required"))
}

#[tonic::async_trait]
impl<S: Storage> Keeper for KeeperService<S> {
    async fn ping(&self, request: Request<Empty>) -> Result<Response<PingResponse>, Status> {
        validated(request)?;
        reply(self.account.ping().await)
    }

    async fn register(
        &self,
        request: Request<RegisterRequest>,
    ) -> Result<Response<TokenResponse>, Status> {
        let req = validated(request)?;
        reply(self.account.register(req.login, req.password).await)
    }

    async fn login(&self, request: Request<LoginRequest>) -> Result<Response<TokenResponse>, Status> {
        let req = validated(request)?;
        reply(self.account.login(req.login, req.password).await)
    }

    async fn list(&self, request: Request<Empty>) -> Result<Response<ListResponse>, Status> {
        let (user, _) = authed(request)?;
        reply(self.account.list(&user).await)
    }

    // ── Passwords ────────────────────────────────────────────────────────

    async fn password_list(&self, request: Request<Empty>) -> Result<Response<NameList>, Status> {
        let (user, _) = authed(request)?;
        reply(self.passwords.list(&user).await)
    }

    async fn password_write(
        &self,
        request: Request<PasswordWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.passwords.write(&user, req).await)
    }

    async fn password_read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<PasswordReadResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.passwords.read(&user, &req.name).await)
    }

    async fn password_update(
        &self,
        request: Request<PasswordUpdateRequest>,
    ) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        let write = required(req.write)?;
        reply(self.passwords.update(&user, req.id, write).await.map(|()| Empty {}))
    }

    async fn password_delete(&self, request: Request<DeleteRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        reply(self.passwords.delete(&user, &req.name).await.map(|()| Empty {}))
    }

    // ── Cards ────────────────────────────────────────────────────────────

    async fn card_list(&self, request: Request<Empty>) -> Result<Response<NameList>, Status> {
        let (user, _) = authed(request)?;
        reply(self.cards.list(&user).await)
    }

    async fn card_write(
        &self,
        request: Request<CardWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.cards.write(&user, req).await)
    }

    async fn card_read(&self, request: Request<ReadRequest>) -> Result<Response<CardReadResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.cards.read(&user, &req.name).await)
    }

    async fn card_update(&self, request: Request<CardUpdateRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        let write = required(req.write)?;
        reply(self.cards.update(&user, req.id, write).await.map(|()| Empty {}))
    }

    async fn card_delete(&self, request: Request<DeleteRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        reply(self.cards.delete(&user, &req.name).await.map(|()| Empty {}))
    }

    // ── Notes ────────────────────────────────────────────────────────────

    async fn note_list(&self, request: Request<Empty>) -> Result<Response<NameList>, Status> {
        let (user, _) = authed(request)?;
        reply(self.notes.list(&user).await)
    }

    async fn note_write(
        &self,
        request: Request<NoteWriteRequest>,
    ) -> Result<Response<WriteResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.notes.write(&user, req).await)
    }

    async fn note_read(&self, request: Request<ReadRequest>) -> Result<Response<NoteReadResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.notes.read(&user, &req.name).await)
    }

    async fn note_update(&self, request: Request<NoteUpdateRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        let write = required(req.write)?;
        reply(self.notes.update(&user, req.id, write).await.map(|()| Empty {}))
    }

    async fn note_delete(&self, request: Request<DeleteRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        reply(self.notes.delete(&user, &req.name).await.map(|()| Empty {}))
    }

    // ── Binaries ─────────────────────────────────────────────────────────

    async fn binary_list(&self, request: Request<Empty>) -> Result<Response<NameList>, Status> {
        let (user, _) = authed(request)?;
        reply(self.binaries.list(&user).await)
    }

    async fn binary_write(
        &self,
        request: Request<BinaryWriteRequest>,
    ) -> Result<Response<BinaryWriteResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.binaries.write(&user, req).await)
    }

    async fn binary_read(
        &self,
        request: Request<ReadRequest>,
    ) -> Result<Response<BinaryReadResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.binaries.read(&user, &req.name).await)
    }

    async fn binary_update(
        &self,
        request: Request<BinaryUpdateRequest>,
    ) -> Result<Response<BinaryUpdateResponse>, Status> {
        let (user, req) = authed(request)?;
        reply(self.binaries.update(&user, req).await)
    }

    async fn binary_delete(&self, request: Request<DeleteRequest>) -> Result<Response<Empty>, Status> {
        let (user, req) = authed(request)?;
        reply(self.binaries.delete(&user, &req.name).await.map(|()| Empty {}))
    }

    async fn binary_upload(
        &self,
        request: Request<Streaming<BinaryUploadChunk>>,
    ) -> Result<Response<BinaryUploadResponse>, Status> {
        // Messages are validated one by one as they arrive.
        let user = caller(&request)?;
        reply(self.binaries.upload(&user, request.into_inner()).await)
    }

    type BinaryDownloadStream = DownloadStream;

    async fn binary_download(
        &self,
        request: Request<BinaryDownloadRequest>,
    ) -> Result<Response<Self::BinaryDownloadStream>, Status> {
        let (user, req) = authed(request)?;
        reply(self.binaries.download(&user, req.bin_id).await)
    }
}

/// Serve the Keeper service on `listener` until `shutdown` resolves.
pub async fn serve<S, F>(
    listener: TcpListener,
    ctx: Arc<AppContext<S>>,
    shutdown: F,
) -> Result<()>
where
    S: Storage,
    F: Future<Output = ()> + Send,
{
    let tokens: Arc<TokenService> = ctx.tokens.clone();
    let metrics: Metrics = ctx.metrics.clone();
    let service = KeeperService::new(ctx);

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "gRPC server ready");
    }

    Server::builder()
        .layer(RequestLogLayer::new(metrics))
        .layer(AuthLayer::new(tokens))
        .add_service(KeeperServer::new(service))
        .serve_with_incoming_shutdown(TcpListenerStream::new(listener), shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("gRPC server error: {e}"))
}
