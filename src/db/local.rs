//! SQLite-backed stand-in for the hosted backend.
//!
//! Every write and every listener callback runs on the database thread, so a
//! subscriber's initial snapshot and later pushes arrive in write order.

use std::{
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    backend::{
        auth::{check_password_strength, is_valid_email},
        documents::apply_updates,
        AuthError, AuthService, AuthUser, Document, DocumentQuery, DocumentStore, ErrorCallback,
        FieldUpdate, RealtimeStore, ValueCallback,
    },
    log_debug, log_info, log_warn,
    models::OccupancyLogEntry,
    query::SubscriptionHandle,
    utils::lock,
};

use super::{
    connection::Database,
    listeners::Listeners,
    password::{hash_password, verify_password},
    repositories::{accounts, documents, realtime},
};

const ENABLE_LOGS: bool = true;

/// Shortest password the account store accepts.
pub const MIN_PASSWORD_LENGTH: usize = 6;
/// Consecutive wrong passwords before an account is locked.
pub const MAX_FAILED_ATTEMPTS: u32 = 5;
const LOCKOUT_MINUTES: i64 = 5;

/// Generates push keys that sort in arrival order.
#[derive(Default)]
struct PushKeys {
    last_millis: i64,
    sequence: u32,
}

impl PushKeys {
    fn next(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        if now > self.last_millis {
            self.last_millis = now;
            self.sequence = 0;
        } else {
            self.sequence += 1;
        }
        format!("{:013}-{:06}", self.last_millis, self.sequence)
    }
}

fn document_key(collection: &str, id: &str) -> String {
    format!("{collection}/{id}")
}

#[derive(Clone)]
pub struct LocalBackend {
    db: Database,
    documents: Arc<Listeners<Option<Document>>>,
    nodes: Arc<Listeners<Option<Value>>>,
    auth: Arc<Listeners<Option<AuthUser>>>,
    current_user: Arc<Mutex<Option<AuthUser>>>,
    push_keys: Arc<Mutex<PushKeys>>,
}

impl LocalBackend {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            documents: Listeners::new(),
            nodes: Listeners::new(),
            auth: Listeners::new(),
            current_user: Arc::new(Mutex::new(None)),
            push_keys: Arc::new(Mutex::new(PushKeys::default())),
        }
    }

    pub fn open(path: PathBuf) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn in_memory() -> Result<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates or replaces a document and notifies its subscribers.
    pub async fn put_document(
        &self,
        collection: &str,
        id: &str,
        fields: Map<String, Value>,
    ) -> Result<()> {
        let collection = collection.to_string();
        let id = id.to_string();
        let listeners = self.documents.clone();

        self.db
            .execute(move |conn| {
                documents::write_document(conn, &collection, &id, &fields)?;
                listeners.notify(
                    &document_key(&collection, &id),
                    Some(Document::new(id.as_str(), fields)),
                );
                Ok(())
            })
            .await
    }

    /// Appends `value` under `path` with a fresh arrival-ordered key.
    pub async fn push(&self, path: &str, value: Value) -> Result<String> {
        let path = path.to_string();
        let listeners = self.nodes.clone();
        let push_keys = self.push_keys.clone();

        self.db
            .execute(move |conn| {
                let key = lock(&push_keys).next();
                realtime::write_child(conn, &path, &key, &value)?;
                listeners.notify(&path, realtime::read_children(conn, &path)?);
                Ok(key)
            })
            .await
    }

    /// Records one device observation for a location.
    pub async fn append_log(
        &self,
        log_root: &str,
        location_id: &str,
        entry: &OccupancyLogEntry,
    ) -> Result<String> {
        let value = serde_json::to_value(entry)?;
        self.push(&format!("{log_root}/{location_id}"), value).await
    }

    /// Removes everything under `path`.
    pub async fn clear(&self, path: &str) -> Result<usize> {
        let path = path.to_string();
        let listeners = self.nodes.clone();

        self.db
            .execute(move |conn| {
                let removed = realtime::delete_children(conn, &path)?;
                listeners.notify(&path, None);
                Ok(removed)
            })
            .await
    }

    /// Registered listeners across documents, realtime paths and auth.
    pub fn active_listeners(&self) -> usize {
        self.documents.len() + self.nodes.len() + self.auth.len()
    }

    /// Swaps the signed-in user and tells auth listeners. Runs on the database
    /// thread so it is ordered with the initial push of new listeners.
    fn set_current_user(
        current_user: &Mutex<Option<AuthUser>>,
        listeners: &Listeners<Option<AuthUser>>,
        user: Option<AuthUser>,
    ) {
        *lock(current_user) = user.clone();
        listeners.notify("", user);
    }
}

fn map_db_error(err: anyhow::Error) -> AuthError {
    log_warn!("Account store failure: {err:#}");
    AuthError::backend(err)
}

async fn run_blocking<T, F>(task: F) -> Result<T, AuthError>
where
    F: FnOnce() -> Result<T, argon2::password_hash::Error> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result.map_err(AuthError::backend),
        Err(join_err) => Err(AuthError::backend(join_err)),
    }
}

#[async_trait]
impl AuthService for LocalBackend {
    async fn create_user(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }
        check_password_strength(password, MIN_PASSWORD_LENGTH)?;

        let password = password.to_string();
        let hash = run_blocking(move || hash_password(&password)).await?;

        let current_user = self.current_user.clone();
        let listeners = self.auth.clone();
        let created = self
            .db
            .execute(move |conn| {
                if accounts::find_account_by_email(conn, &email)?.is_some() {
                    return Ok(Err(AuthError::EmailInUse));
                }
                let uid = Uuid::new_v4().simple().to_string();
                accounts::insert_account(conn, &uid, &email, &hash)?;
                let user = AuthUser {
                    uid,
                    email: Some(email),
                };
                Self::set_current_user(&current_user, &listeners, Some(user.clone()));
                Ok(Ok(user))
            })
            .await
            .map_err(map_db_error)??;

        log_info!("Created account {}", created.uid);
        Ok(created)
    }

    async fn login(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        let email = email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(AuthError::InvalidEmail);
        }

        let lookup = email.clone();
        let account = self
            .db
            .execute(move |conn| accounts::find_account_by_email(conn, &lookup))
            .await
            .map_err(map_db_error)?
            .ok_or(AuthError::UserNotFound)?;

        if account
            .locked_until
            .map_or(false, |until| until > Utc::now())
        {
            return Err(AuthError::TooManyRequests);
        }

        let password = password.to_string();
        let hash = account.password_hash.clone();
        let matches = run_blocking(move || verify_password(&password, &hash)).await?;

        let uid = account.uid.clone();
        if !matches {
            let locked = self
                .db
                .execute(move |conn| {
                    let attempts = accounts::record_failed_login(conn, &uid)?;
                    if attempts >= MAX_FAILED_ATTEMPTS {
                        let until = Utc::now() + Duration::minutes(LOCKOUT_MINUTES);
                        accounts::lock_account(conn, &uid, until)?;
                        return Ok(true);
                    }
                    Ok(false)
                })
                .await
                .map_err(map_db_error)?;

            if locked {
                log_warn!("Account {} locked after repeated failures", account.uid);
                return Err(AuthError::TooManyRequests);
            }
            return Err(AuthError::WrongPassword);
        }

        log_debug!(
            "Login for {} (created {}, previous login {:?})",
            account.uid,
            account.created_at,
            account.last_login_at
        );

        let user = AuthUser {
            uid: account.uid,
            email: Some(account.email),
        };
        let current_user = self.current_user.clone();
        let listeners = self.auth.clone();
        let signed_in = user.clone();
        self.db
            .execute(move |conn| {
                accounts::record_successful_login(conn, &signed_in.uid)?;
                Self::set_current_user(&current_user, &listeners, Some(signed_in));
                Ok(())
            })
            .await
            .map_err(map_db_error)?;

        Ok(user)
    }

    async fn logout(&self) -> Result<(), AuthError> {
        let current_user = self.current_user.clone();
        let listeners = self.auth.clone();
        self.db
            .execute(move |_conn| {
                Self::set_current_user(&current_user, &listeners, None);
                Ok(())
            })
            .await
            .map_err(map_db_error)
    }

    fn current_user(&self) -> Option<AuthUser> {
        lock(&self.current_user).clone()
    }

    fn on_auth_state_changed(
        &self,
        callback: ValueCallback<Option<AuthUser>>,
    ) -> SubscriptionHandle {
        let on_error: ErrorCallback = Arc::new(|message: String| {
            log_warn!("Auth listener error: {message}");
        });
        let (id, handle) = self.auth.register("", callback.clone(), on_error);

        let current_user = self.current_user.clone();
        let listeners = self.auth.clone();
        let queued = self.db.submit(move |_conn| {
            let user = lock(&current_user).clone();
            listeners.deliver(id, user);
        });
        if let Err(err) = queued {
            log_warn!("Could not queue initial auth state: {err:#}");
            callback(self.current_user());
        }
        handle
    }
}

#[async_trait]
impl DocumentStore for LocalBackend {
    async fn query(&self, collection: &str, query: &DocumentQuery) -> Result<Vec<Document>> {
        let all = self.db.list_documents(collection).await?;
        Ok(query.apply(all))
    }

    async fn get_by_id(&self, collection: &str, id: &str) -> Result<Option<Document>> {
        self.db.get_document(collection, id).await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<(String, FieldUpdate)>,
    ) -> Result<()> {
        let collection = collection.to_string();
        let id = id.to_string();
        let listeners = self.documents.clone();

        self.db
            .execute(move |conn| {
                let Some(mut document) = documents::load_document(conn, &collection, &id)? else {
                    bail!("no document to update at {collection}/{id}");
                };
                apply_updates(&mut document.fields, &updates);
                documents::write_document(conn, &collection, &id, &document.fields)?;
                listeners.notify(&document_key(&collection, &id), Some(document));
                Ok(())
            })
            .await
    }

    fn subscribe_document(
        &self,
        collection: &str,
        id: &str,
        on_value: ValueCallback<Option<Document>>,
        on_error: ErrorCallback,
    ) -> SubscriptionHandle {
        let key = document_key(collection, id);
        let (listener_id, handle) =
            self.documents
                .register(key.as_str(), on_value, on_error.clone());

        let collection = collection.to_string();
        let id = id.to_string();
        let listeners = self.documents.clone();
        let queued = self.db.submit(move |conn| {
            match documents::load_document(conn, &collection, &id) {
                Ok(document) => listeners.deliver(listener_id, document),
                Err(err) => listeners.fail(listener_id, format!("{err:#}")),
            }
        });
        if let Err(err) = queued {
            on_error(format!("{:#}", err.context(key)));
        }
        handle
    }
}

impl RealtimeStore for LocalBackend {
    fn subscribe(
        &self,
        path: &str,
        on_value: ValueCallback<Option<Value>>,
        on_error: ErrorCallback,
    ) -> SubscriptionHandle {
        let (listener_id, handle) = self.nodes.register(path, on_value, on_error.clone());

        let path = path.to_string();
        let listeners = self.nodes.clone();
        let queued = self.db.submit(move |conn| match realtime::read_children(conn, &path) {
            Ok(value) => listeners.deliver(listener_id, value),
            Err(err) => listeners.fail(listener_id, format!("{err:#}")),
        });
        if let Err(err) = queued {
            on_error(format!("{err:#}"));
        }
        handle
    }
}
