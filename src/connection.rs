//! Logical connection: dispatches calls and pins the open transaction.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::endpoint::Endpoint;
use crate::error::{Error, Result};
use crate::pool::Pool;
use crate::reply::{JsonReplyDecoder, ReplyDecoder};
use crate::request::{Command, Envelope, PayloadBuilder};
use crate::transport::Connector;

/// Transaction state of one connection
#[derive(Debug, Default)]
struct TransactionContext {
    id: Option<String>,
    begin_in_progress: bool,
}

/// Clears the begin-transaction flag however the call ends.
struct BeginGuard<'a> {
    context: &'a Mutex<TransactionContext>,
}

impl BeginGuard<'_> {
    fn complete(self, transaction_id: Option<String>) {
        if transaction_id.is_none() {
            warn!("begin-transaction reply carried no transaction id");
        }
        lock(self.context).id = transaction_id;
    }
}

impl Drop for BeginGuard<'_> {
    fn drop(&mut self) {
        lock(self.context).begin_in_progress = false;
    }
}

fn lock(context: &Mutex<TransactionContext>) -> MutexGuard<'_, TransactionContext> {
    context.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A logical connection to one storage.
///
/// Calls may run concurrently; each one borrows its own session from the
/// pool. A transaction opened with `begin-transaction` is pinned to this
/// object and carried by every later call until a commit or rollback is
/// dispatched.
///
/// The transaction id is forgotten once a commit or rollback has been built
/// and is about to be sent, before the storage acknowledges it. A rejected
/// commit therefore still leaves this connection outside the transaction;
/// one whose payload could not be built leaves it pinned.
#[derive(Debug)]
pub struct Connection<D: ReplyDecoder = JsonReplyDecoder> {
    config: Arc<ClientConfig>,
    endpoint: Endpoint,
    connector: Connector,
    pool: Arc<Pool>,
    decoder: D,
    transaction: Mutex<TransactionContext>,
}

impl Connection<JsonReplyDecoder> {
    /// Validate `config` and resolve its endpoint. Nothing is connected
    /// until the first call.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_decoder(config, JsonReplyDecoder)
    }
}

impl<D: ReplyDecoder> Connection<D> {
    pub fn with_decoder(config: ClientConfig, decoder: D) -> Result<Self> {
        let endpoint = config.endpoint()?;
        let connector = Connector::new(&endpoint, config.max_response_bytes)?;
        let pool = Arc::new(Pool::with_max_idle(config.max_idle_per_endpoint));
        debug!(endpoint = %endpoint, storage = %config.storage, "connection configured");
        Ok(Self {
            config: Arc::new(config),
            endpoint,
            connector,
            pool,
            decoder,
            transaction: Mutex::new(TransactionContext::default()),
        })
    }

    /// Share `pool` with other connections.
    pub fn with_pool(mut self, pool: Arc<Pool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    pub fn decoder(&self) -> &D {
        &self.decoder
    }

    /// Transaction currently pinned to this connection
    pub fn transaction_id(&self) -> Option<String> {
        lock(&self.transaction).id.clone()
    }

    /// Whether a begin-transaction call is outstanding
    pub fn begin_in_progress(&self) -> bool {
        lock(&self.transaction).begin_in_progress
    }

    /// Send one command and decode its reply.
    ///
    /// Fails with [`Error::State`] without any I/O while a begin-transaction
    /// call is outstanding. Transport and framing failures retire the
    /// session that produced them; nothing is retried.
    pub async fn send_request<P>(&self, command: &Command, payload: &P) -> Result<D::Reply>
    where
        P: PayloadBuilder + ?Sized,
    {
        let start = Instant::now();

        let (transaction_id, begins) = {
            let mut context = lock(&self.transaction);
            if context.begin_in_progress {
                return Err(Error::State(
                    "begin-transaction already in progress".to_string(),
                ));
            }
            let transaction_id = context.id.clone();
            let begins = *command == Command::BeginTransaction;
            if begins {
                context.begin_in_progress = true;
            }
            (transaction_id, begins)
        };
        let begin_guard = begins.then(|| BeginGuard {
            context: &self.transaction,
        });

        let envelope = Envelope {
            storage: &self.config.storage,
            user: &self.config.username,
            password: &self.config.password,
            command,
            response_format: self.config.response_format,
            application: self.config.application.as_deref(),
            extra_params: &self.config.extra_params,
            document_root_xpath: &self.config.document_root_xpath,
            document_id_xpath: &self.config.document_id_xpath,
            transaction_id: transaction_id.as_deref(),
        };
        let document = payload.build(&envelope).map_err(|e| match e {
            Error::InvalidRequest(_) => e,
            other => Error::InvalidRequest(other.to_string()),
        })?;
        // the closing request still names the transaction it ends
        if command.ends_transaction() {
            lock(&self.transaction).id = None;
        }

        let mut session = self.pool.acquire(&self.endpoint, &self.connector).await?;
        let session_id = session.id();
        let network_start = Instant::now();
        let raw = match session
            .round_trip(document.as_bytes(), &self.config.storage)
            .await
        {
            Ok(raw) => {
                session.release();
                raw
            }
            Err(e) => {
                warn!(session = session_id, command = %command, error = %e, "request failed");
                session.retire();
                return Err(e);
            }
        };
        let network_ms = network_start.elapsed().as_millis() as u64;

        let reply = self.decoder.decode(&raw)?;
        if let Some(guard) = begin_guard {
            guard.complete(self.decoder.transaction_id(&reply));
        }

        debug!(
            session = session_id,
            command = %command,
            bytes = raw.payload().len(),
            network_ms,
            total_ms = start.elapsed().as_millis() as u64,
            "request complete"
        );
        Ok(reply)
    }
}
