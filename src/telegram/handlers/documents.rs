//! Cookie file uploads.

use fluent_templates::fluent_bundle::FluentArgs;

use super::types::{Caller, HandlerDeps, HandlerError};
use crate::core::config;
use crate::download::cleanup::remove_file_quietly;
use crate::download::task::generate_task_id;
use crate::i18n;
use crate::storage::cookies::{detect_cookie_platform, save_cookie, to_netscape};
use crate::storage::db;
use crate::telegram::guards::GuardChain;

/// Extensions accepted for cookie exports
const COOKIE_EXTENSIONS: &[&str] = &["txt", "json"];

/// A document attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingDocument {
    pub file_id: String,
    pub file_name: Option<String>,
    /// Size reported by Telegram, in bytes
    pub size: u32,
}

impl IncomingDocument {
    pub fn from_document(doc: &teloxide::types::Document) -> Self {
        Self {
            file_id: doc.file.id.0.clone(),
            file_name: doc.file_name.clone(),
            size: doc.file.size,
        }
    }

    fn has_cookie_extension(&self) -> bool {
        self.file_name
            .as_deref()
            .and_then(|name| name.rsplit_once('.'))
            .is_some_and(|(_, ext)| COOKIE_EXTENSIONS.iter().any(|e| ext.eq_ignore_ascii_case(e)))
    }
}

/// Handles an uploaded cookie export.
pub async fn handle_cookie_document(
    deps: &HandlerDeps,
    caller: &Caller,
    doc: &IncomingDocument,
) -> Result<(), HandlerError> {
    let lang = &caller.lang;
    if !caller.passes(deps, &GuardChain::user()).await {
        return Ok(());
    }

    if !doc.has_cookie_extension() {
        deps.reply(caller.chat_id, &i18n::t(lang, "cookie-invalid-format"), None)
            .await;
        return Ok(());
    }
    if doc.size > config::cookies::MAX_UPLOAD_BYTES {
        deps.reply(caller.chat_id, &i18n::t(lang, "cookie-too-large"), None).await;
        return Ok(());
    }

    let path = deps
        .pipeline
        .download_dir
        .join(format!("{}.upload", generate_task_id()));
    let content = match deps.sink().download_file(&doc.file_id, &path).await {
        Ok(()) => tokio::fs::read(&path).await,
        Err(e) => {
            log::warn!("User {}: cookie upload download failed: {}", caller.id(), e);
            remove_file_quietly(&path).await;
            deps.reply(caller.chat_id, &i18n::t(lang, "errors-generic"), None).await;
            return Ok(());
        }
    };
    remove_file_quietly(&path).await;
    let content = content?;

    if content.len() > config::cookies::MAX_UPLOAD_BYTES as usize {
        deps.reply(caller.chat_id, &i18n::t(lang, "cookie-too-large"), None).await;
        return Ok(());
    }
    let netscape = match String::from_utf8(content).map_err(|e| e.to_string()).and_then(|text| {
        to_netscape(&text).map_err(|e| e.to_string())
    }) {
        Ok(netscape) => netscape,
        Err(e) => {
            log::info!("User {} uploaded an unusable cookie file: {}", caller.id(), e);
            deps.reply(caller.chat_id, &i18n::t(lang, "cookie-invalid-format"), None)
                .await;
            return Ok(());
        }
    };

    let Some(platform) = detect_cookie_platform(&netscape) else {
        deps.reply(caller.chat_id, &i18n::t(lang, "cookie-unknown-platform"), None)
            .await;
        return Ok(());
    };

    {
        let mut conn = db::get_connection(deps.pool())?;
        save_cookie(&mut conn, deps.pipeline.cipher, caller.id(), platform, &netscape)?;
    }

    let mut args = FluentArgs::new();
    args.set("platform", platform.display_name());
    deps.reply(caller.chat_id, &i18n::t_args(lang, "cookie-saved", &args), None)
        .await;
    Ok(())
}
