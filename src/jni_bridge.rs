// Dwn Core - Media download orchestration for mobile
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


//! JNI bridge for Android - Exposes the download core to the Kotlin module
//!
//! # Architecture
//! Kotlin (com.example.dwn.core.DwnCoreBridge) → JNI → Rust
//!
//! The host declares every entry point as a static method taking and
//! returning a JSON string, e.g.
//! `@JvmStatic external fun nativeInit(paramsJson: String): String`.
//!
//! # Design Patterns
//! 1. **JSON Communication**: Parameters and results cross FFI as JSON strings
//! 2. **Error Handling**: All errors are returned as JSON error responses
//! 3. **Async Runtime**: One Tokio runtime drives every session
//! 4. **No Panics**: Panics are caught before they reach the JVM
//!
//! Progress is polled (`nativeGetProgress`, `nativeGetQueue`) rather than
//! pushed, so no JVM callbacks are held by Rust.
//!
//! # Response Format
//! ```json
//! { "success": true, "data": { ... } }
//! ```
//! Or on error:
//! ```json
//! { "success": false, "error": "Error message" }
//! ```

use crate::config::DownloadConfig;
use crate::download::models::{noop_complete, noop_progress};
use crate::download::DownloadManager;
use crate::error::{DwnError, Result};
use crate::settings::{ConnectionType, DownloadQuality, NetworkMonitor, SettingsManager};
use crate::storage::MediaType;
use jni::objects::{JClass, JString};
use jni::sys::jstring;
use jni::JNIEnv;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

/// Everything one app data root needs
struct Session {
    manager: Arc<DownloadManager>,
    settings: Arc<SettingsManager>,
    network: Arc<NetworkMonitor>,
}

lazy_static::lazy_static! {
    static ref RUNTIME: tokio::runtime::Runtime =
        tokio::runtime::Runtime::new().expect("Failed to create Tokio runtime");

    // root_dir -> session
    static ref SESSIONS: Mutex<HashMap<String, Arc<Session>>> = Mutex::new(HashMap::new());
}

async fn get_or_create_session(root_dir: &str) -> Result<Arc<Session>> {
    if let Some(session) = lookup_session(root_dir)? {
        return Ok(session);
    }

    let config = DownloadConfig::rooted_at(root_dir);
    let network = Arc::new(NetworkMonitor::default());
    let settings = Arc::new(SettingsManager::load(&config.settings_path, Arc::clone(&network)));
    let manager = DownloadManager::open(config, Arc::clone(&settings)).await?;
    let _ = manager.watch_connectivity(network.subscribe());

    let session = Arc::new(Session {
        manager,
        settings,
        network,
    });

    let mut sessions = SESSIONS
        .lock()
        .map_err(|_| DwnError::internal("session map poisoned"))?;
    Ok(Arc::clone(
        sessions.entry(root_dir.to_string()).or_insert(session),
    ))
}

fn lookup_session(root_dir: &str) -> Result<Option<Arc<Session>>> {
    let sessions = SESSIONS
        .lock()
        .map_err(|_| DwnError::internal("session map poisoned"))?;
    Ok(sessions.get(root_dir).cloned())
}

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn jstring_to_string(env: &mut JNIEnv, jstr: JString) -> Result<String> {
    env.get_string(&jstr)
        .map(|s| s.into())
        .map_err(|e| DwnError::InvalidInput(format!("JNI string conversion failed: {}", e)))
}

fn success_response<T: Serialize>(data: T) -> String {
    serde_json::json!({
        "success": true,
        "data": data
    })
    .to_string()
}

fn error_response(error: &str) -> String {
    serde_json::json!({
        "success": false,
        "error": error
    })
    .to_string()
}

/// Wrap a function call with panic catching
fn catch_panic<F>(f: F) -> String
where
    F: FnOnce() -> String,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(panic_err) => {
            let panic_msg = if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };
            error_response(&format!("Rust panic: {}", panic_msg))
        }
    }
}

/// Parse JSON params, run `handler` on the runtime and encode the response
fn respond<P, T, F, Fut>(env: &mut JNIEnv, params_json: JString, handler: F) -> jstring
where
    P: DeserializeOwned,
    T: Serialize,
    F: FnOnce(P) -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let params_str = jstring_to_string(env, params_json);

    let response = catch_panic(move || {
        let result = params_str.and_then(|s| {
            serde_json::from_str::<P>(&s)
                .map_err(|e| DwnError::InvalidInput(format!("Invalid JSON: {}", e)))
        });
        match result.and_then(|params| RUNTIME.block_on(handler(params))) {
            Ok(data) => success_response(data),
            Err(e) => error_response(&e.user_message()),
        }
    });

    env.new_string(response)
        .map(|s| s.into_raw())
        .unwrap_or(std::ptr::null_mut())
}

#[derive(Deserialize)]
struct SessionParams {
    root_dir: String,
}

#[derive(Deserialize)]
struct UrlParams {
    root_dir: String,
    url: String,
    media_type: String,
}

#[derive(Deserialize)]
struct IdParams {
    root_dir: String,
    id: String,
}

// ============================================================================
// SESSION
// ============================================================================

/// Open (or reuse) the session for an app data root
///
/// # Arguments (JSON string)
/// ```json
/// { "root_dir": "/data/data/.../files" }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeInit(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: SessionParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({
            "version": crate::core_version(),
            "settings": session.settings.settings(),
        }))
    })
}

/// Report the active transport
///
/// # Arguments (JSON string)
/// ```json
/// { "root_dir": "...", "connection": "WIFI" }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeSetConnection(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    #[derive(Deserialize)]
    struct Params {
        root_dir: String,
        connection: String,
    }

    respond(&mut env, params_json, |p: Params| async move {
        let connection = ConnectionType::from_str(&p.connection)?;
        let session = get_or_create_session(&p.root_dir).await?;
        session.network.set_connection(connection);
        Ok(serde_json::json!({ "connection": connection }))
    })
}

/// Update download settings; absent fields are left unchanged
///
/// # Arguments (JSON string)
/// ```json
/// { "root_dir": "...", "quality": "HIGH", "wifi_only": true, "auto_resume": false }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeUpdateSettings(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    #[derive(Deserialize)]
    struct Params {
        root_dir: String,
        quality: Option<String>,
        wifi_only: Option<bool>,
        auto_resume: Option<bool>,
    }

    respond(&mut env, params_json, |p: Params| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        if let Some(quality) = p.quality {
            session.settings.set_download_quality(DownloadQuality::from_str(&quality)?)?;
        }
        if let Some(enabled) = p.wifi_only {
            session.settings.set_wifi_only(enabled)?;
        }
        if let Some(enabled) = p.auto_resume {
            session.settings.set_auto_resume(enabled)?;
        }
        session.manager.queue().process_queue();
        Ok(session.settings.settings())
    })
}

// ============================================================================
// DOWNLOADS
// ============================================================================

/// Start a download now, bypassing the queue
///
/// # Returns (JSON)
/// ```json
/// { "success": true, "data": { "download_id": "uuid-or-null" } }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeStartDownload(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: UrlParams| async move {
        let media_type = MediaType::from_str(&p.media_type)?;
        let session = get_or_create_session(&p.root_dir).await?;
        let id = session
            .manager
            .start_download(&p.url, media_type, noop_progress(), noop_complete())
            .await?;
        Ok(serde_json::json!({ "download_id": id }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeAddToQueue(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: UrlParams| async move {
        let media_type = MediaType::from_str(&p.media_type)?;
        let session = get_or_create_session(&p.root_dir).await?;
        let id = session.manager.add_to_queue(&p.url, media_type)?;
        Ok(serde_json::json!({ "entry_id": id }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeRemoveFromQueue(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({ "removed": session.manager.remove_from_queue(&p.id) }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeRetryQueued(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        session.manager.retry_queued_download(&p.id)?;
        Ok(serde_json::json!({ "retried": true }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeClearCompleted(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: SessionParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({ "cleared": session.manager.clear_completed_from_queue() }))
    })
}

/// Snapshot of the queue for UI binding
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeGetQueue(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: SessionParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(session.manager.queue_entries())
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativePauseDownload(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({ "paused": session.manager.pause_download(&p.id).await }))
    })
}

/// Restart a paused or failed download from zero
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeResumeDownload(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        session
            .manager
            .resume_download(&p.id, noop_progress(), noop_complete())
            .await?;
        Ok(serde_json::json!({ "resumed": true }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeCancelDownload(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        session.manager.cancel_download(&p.id).await?;
        Ok(serde_json::json!({ "cancelled": true }))
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeDeleteDownload(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({ "deleted": session.manager.delete_download(&p.id).await? }))
    })
}

/// Live progress of a running job, `null` when it is not running
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeGetProgress(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        let progress = session
            .manager
            .progress_of(&p.id)
            .map(|rx| rx.borrow().clone());
        Ok(progress)
    })
}

/// All records, newest first; `query` filters by title or URL
///
/// # Arguments (JSON string)
/// ```json
/// { "root_dir": "...", "query": "optional search text" }
/// ```
#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeListDownloads(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    #[derive(Deserialize)]
    struct Params {
        root_dir: String,
        query: Option<String>,
    }

    respond(&mut env, params_json, |p: Params| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        match p.query.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => session.manager.search_downloads(query).await,
            None => session.manager.list_downloads().await,
        }
    })
}

#[no_mangle]
pub extern "C" fn Java_com_example_dwn_core_DwnCoreBridge_nativeRecordPlay(
    mut env: JNIEnv,
    _class: JClass,
    params_json: JString,
) -> jstring {
    respond(&mut env, params_json, |p: IdParams| async move {
        let session = get_or_create_session(&p.root_dir).await?;
        Ok(serde_json::json!({ "counted": session.manager.record_play(&p.id).await? }))
    })
}
