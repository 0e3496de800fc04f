//! Telegram Bot Integration
//!
//! Long-polling transport for the conversation engine. Text, photos and
//! documents from authorized users become [`InboundMessage`]s; replies are
//! sent back with an inline keyboard built from the render options.
//!
//! Inline keyboard buttons carry `sig|json` callback data, where `json` is the
//! JSON-encoded option payload and `sig` the first 12 hex chars of
//! SHA-256(secret ‖ json). Callbacks with a bad signature are dropped.

use anyhow::{Context, Result};
use reqwest::Client;
use sdk::errors::TasksbotErrorExt;
use sdk::types::{InboundMessage, MenuOption, RenderInstruction, UserId};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::TelegramConfig;
use crate::conversation::ConversationEngine;
use crate::validator::ATTACHMENT_PREFIX;

/// Telegram limits callback_data to 64 bytes
const MAX_CALLBACK_BYTES: usize = 64;
/// Telegram limits message text to 4096 characters
const MAX_MESSAGE_CHARS: usize = 4000;
const SIGNATURE_LEN: usize = 12;

/// Inline keyboard button for Telegram
#[derive(Serialize, Debug)]
struct InlineKeyboardButton {
    text: String,
    callback_data: String,
}

/// Inline keyboard markup for Telegram
#[derive(Serialize, Debug)]
struct InlineKeyboardMarkup {
    inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

#[derive(Deserialize, Debug)]
pub(crate) struct Update {
    update_id: i64,
    message: Option<Message>,
    callback_query: Option<CallbackQuery>,
}

#[derive(Deserialize, Debug)]
struct Message {
    chat: Chat,
    text: Option<String>,
    caption: Option<String>,
    from: Option<User>,
    #[serde(default)]
    photo: Vec<PhotoSize>,
    document: Option<Document>,
}

#[derive(Deserialize, Debug)]
struct CallbackQuery {
    id: String,
    from: User,
    message: Option<Message>,
    data: Option<String>,
}

#[derive(Deserialize, Debug)]
struct Chat {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct User {
    id: i64,
}

#[derive(Deserialize, Debug)]
struct PhotoSize {
    file_id: String,
}

#[derive(Deserialize, Debug)]
struct Document {
    file_id: String,
}

#[derive(Deserialize, Debug)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

/// Sign an option payload for use as callback data.
pub fn sign_payload(secret: &str, payload: &str) -> Result<String> {
    let json = serde_json::to_string(payload).context("Failed to encode callback payload")?;
    Ok(format!("{}|{}", signature(secret, &json), json))
}

/// Verify callback data and return the payload it carries.
pub fn verify_payload(secret: &str, data: &str) -> Option<String> {
    let (sig, json) = data.split_once('|')?;
    if sig != signature(secret, json) {
        return None;
    }
    serde_json::from_str(json).ok()
}

fn signature(secret: &str, json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(json.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..SIGNATURE_LEN].to_string()
}

fn truncate(text: &str) -> String {
    if text.chars().count() > MAX_MESSAGE_CHARS {
        let cut: String = text.chars().take(MAX_MESSAGE_CHARS).collect();
        format!("{}...\n\n(truncated)", cut)
    } else {
        text.to_string()
    }
}

/// Thin client over the Bot API methods the transport needs.
#[derive(Clone)]
pub struct TelegramApi {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for TelegramApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // base_url embeds the token
        f.debug_struct("TelegramApi").finish_non_exhaustive()
    }
}

impl TelegramApi {
    pub fn new(api_base: &str, token: &str, poll_timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(poll_timeout + Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: format!("{}/bot{}", api_base.trim_end_matches('/'), token),
        }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .client
            .post(format!("{}/{}", self.base_url, method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to call {}", method))?
            .json::<ApiResponse<T>>()
            .await
            .with_context(|| format!("Failed to decode {} response", method))?;

        if !response.ok {
            return Err(anyhow::anyhow!(
                "Telegram API returned ok=false for {}: {}",
                method,
                response.description.unwrap_or_default()
            ));
        }
        response
            .result
            .with_context(|| format!("{} returned no result", method))
    }

    pub(crate) async fn get_updates(&self, offset: i64, timeout: Duration) -> Result<Vec<Update>> {
        self.call(
            "getUpdates",
            &serde_json::json!({
                "offset": offset,
                "timeout": timeout.as_secs(),
                "allowed_updates": ["message", "callback_query"],
            }),
        )
        .await
    }

    pub async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        keyboard: Option<&serde_json::Value>,
    ) -> Result<()> {
        let mut body = serde_json::json!({
            "chat_id": chat_id,
            "text": truncate(text),
        });
        if let Some(keyboard) = keyboard {
            body["reply_markup"] = keyboard.clone();
        }
        self.call::<serde_json::Value>("sendMessage", &body).await?;
        Ok(())
    }

    async fn answer_callback(&self, callback_id: &str) -> Result<()> {
        self.call::<serde_json::Value>(
            "answerCallbackQuery",
            &serde_json::json!({ "callback_query_id": callback_id }),
        )
        .await?;
        Ok(())
    }
}

/// An update translated for the engine
#[derive(Debug)]
pub(crate) struct Incoming {
    chat_id: i64,
    message: InboundMessage,
    callback_id: Option<String>,
}

#[derive(Clone)]
pub struct TelegramBot {
    api: TelegramApi,
    engine: Arc<ConversationEngine>,
    allowed_users: Vec<i64>,
    secret: String,
    poll_timeout: Duration,
}

impl std::fmt::Debug for TelegramBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBot")
            .field("allowed_users", &self.allowed_users)
            .field("poll_timeout", &self.poll_timeout)
            .finish()
    }
}

impl TelegramBot {
    pub fn new(config: &TelegramConfig, engine: Arc<ConversationEngine>) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .context("Telegram token is not configured")?;
        let secret = config
            .signing_secret()
            .context("Telegram callback secret is not configured")?;
        let poll_timeout = Duration::from_secs(config.poll_timeout_secs);

        Ok(Self {
            api: TelegramApi::new(&config.api_base, token, poll_timeout),
            engine,
            allowed_users: config.allowed_users.clone(),
            secret: secret.to_string(),
            poll_timeout,
        })
    }

    fn is_allowed(&self, user_id: UserId) -> bool {
        self.allowed_users.is_empty() || self.allowed_users.contains(&user_id)
    }

    /// Run the long-polling loop until `shutdown` resolves.
    ///
    /// Every update is handled on its own tokio task; the engine serializes
    /// messages of the same user.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        info!("Starting Telegram long-polling loop");
        tokio::pin!(shutdown);
        let mut offset = 0;

        loop {
            let updates = tokio::select! {
                _ = &mut shutdown => {
                    info!("Telegram transport stopped");
                    return Ok(());
                }
                updates = self.api.get_updates(offset, self.poll_timeout) => updates,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        let bot = self.clone();
                        tokio::spawn(async move { bot.handle_update(update).await });
                    }
                }
                Err(e) => {
                    error!("Failed to fetch Telegram updates: {:#}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    /// Translate an update into an engine message, or `None` if it is ignored.
    pub(crate) fn translate(&self, update: Update) -> Option<Incoming> {
        if let Some(query) = update.callback_query {
            let chat_id = query.message.as_ref().map(|m| m.chat.id)?;
            let payload = match query.data.as_deref().and_then(|d| verify_payload(&self.secret, d)) {
                Some(payload) => payload,
                None => {
                    warn!(user_id = query.from.id, "Ignoring callback with invalid signature");
                    return None;
                }
            };
            return Some(Incoming {
                chat_id,
                message: InboundMessage::new(query.from.id, payload),
                callback_id: Some(query.id),
            });
        }

        let msg = update.message?;
        let user_id = match msg.from.as_ref() {
            Some(u) => u.id,
            None => {
                warn!("Message with no user info - ignoring");
                return None;
            }
        };

        let text = if let Some(photo) = msg.photo.last() {
            format!("{}{}", ATTACHMENT_PREFIX, photo.file_id)
        } else if let Some(document) = &msg.document {
            format!("{}{}", ATTACHMENT_PREFIX, document.file_id)
        } else {
            msg.text.clone().or_else(|| msg.caption.clone())?
        };

        Some(Incoming {
            chat_id: msg.chat.id,
            message: InboundMessage::new(user_id, text),
            callback_id: None,
        })
    }

    async fn handle_update(&self, update: Update) {
        let Some(incoming) = self.translate(update) else {
            return;
        };

        if let Some(id) = &incoming.callback_id {
            if let Err(e) = self.api.answer_callback(id).await {
                debug!("Failed to answer callback query: {:#}", e);
            }
        }

        let user_id = incoming.message.user_id;
        if !self.is_allowed(user_id) {
            warn!("Unauthorized user {} attempted to use the bot", user_id);
            if let Err(e) = self
                .api
                .send_message(incoming.chat_id, "Unauthorized. Access denied.", None)
                .await
            {
                debug!("Failed to send access denied reply: {:#}", e);
            }
            return;
        }

        debug!(user_id, "Dispatching message to the engine");
        let reply = match self.engine.handle_message(incoming.message).await {
            Ok(render) => render,
            Err(e) => {
                warn!(user_id, "Message failed: {}", e);
                RenderInstruction::reprompt(e.user_hint())
            }
        };

        if let Err(e) = self.send_render(incoming.chat_id, &reply).await {
            error!("Failed to send reply to {}: {:#}", incoming.chat_id, e);
        }
    }

    /// Send a render instruction, options becoming inline keyboard rows.
    pub async fn send_render(&self, chat_id: i64, render: &RenderInstruction) -> Result<()> {
        let keyboard = self.keyboard(&render.options)?;
        self.api
            .send_message(chat_id, &render.text, keyboard.as_ref())
            .await
    }

    fn keyboard(&self, options: &[MenuOption]) -> Result<Option<serde_json::Value>> {
        if options.is_empty() {
            return Ok(None);
        }

        let mut rows = Vec::with_capacity(options.len());
        for option in options {
            let callback_data = sign_payload(&self.secret, &option.payload)?;
            if callback_data.len() > MAX_CALLBACK_BYTES {
                warn!(payload = %option.payload, "Option payload too long for a button, skipping");
                continue;
            }
            rows.push(vec![InlineKeyboardButton {
                text: option.label.clone(),
                callback_data,
            }]);
        }

        let markup = InlineKeyboardMarkup {
            inline_keyboard: rows,
        };
        Ok(Some(
            serde_json::to_value(markup).context("Failed to encode inline keyboard")?,
        ))
    }
}
