//! Matrix client-server HTTP adapter.
//!
//! Stateless per invocation: credentials come in at construction, every call
//! is a plain HTTP round-trip with a shared bounded timeout, and history is
//! normalized to the oldest-first order the reconciliation engine expects.

use crate::{BackendError, ChatBackend};
use ac_core::{ChatMessage, Target};
use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub device_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomMember {
    pub user_id: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ConnectionStatus {
    pub user_id: String,
    pub rooms: usize,
}

#[derive(Debug, Clone)]
pub struct MatrixClient {
    http: Client,
    base_url: Url,
    server_name: String,
    auth: Option<Credentials>,
}

impl MatrixClient {
    pub fn new(
        homeserver_url: &str,
        server_name: &str,
        auth: Option<Credentials>,
    ) -> Result<Self, BackendError> {
        let base_url = Url::parse(homeserver_url)
            .map_err(|err| BackendError::Unavailable(format!("bad homeserver url: {err}")))?;
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(BackendError::from)?;
        Ok(Self {
            http,
            base_url,
            server_name: server_name.to_string(),
            auth,
        })
    }

    fn api_url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut parts = url
                .path_segments_mut()
                .expect("homeserver url can be a base");
            parts.pop_if_empty();
            parts.extend(["_matrix", "client", "v3"]);
            parts.extend(segments);
        }
        url
    }

    fn token(&self) -> Result<&str, BackendError> {
        self.auth
            .as_ref()
            .map(|creds| creds.access_token.as_str())
            .ok_or_else(|| BackendError::Auth("not logged in".to_string()))
    }

    fn own_user_id(&self) -> Result<&str, BackendError> {
        self.auth
            .as_ref()
            .map(|creds| creds.user_id.as_str())
            .ok_or_else(|| BackendError::Auth("not logged in".to_string()))
    }

    /// `name` or `@name` -> `@name:server`, full ids pass through.
    fn full_user_id(&self, name: &str) -> String {
        let local = name.strip_prefix('@').unwrap_or(name);
        if local.contains(':') {
            format!("@{local}")
        } else {
            format!("@{local}:{}", self.server_name)
        }
    }

    /// `#name` -> `#name:server`, full aliases pass through.
    fn full_alias(&self, alias: &str) -> String {
        let local = alias.strip_prefix('#').unwrap_or(alias);
        if local.contains(':') {
            format!("#{local}")
        } else {
            format!("#{local}:{}", self.server_name)
        }
    }

    async fn get(&self, url: Url) -> Result<Response, BackendError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.token()?)
            .send()
            .await?;
        expect_ok(response).await
    }

    async fn post(&self, url: Url, body: Value) -> Result<Response, BackendError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await?;
        expect_ok(response).await
    }

    async fn put(&self, url: Url, body: Value) -> Result<Response, BackendError> {
        let response = self
            .http
            .put(url)
            .bearer_auth(self.token()?)
            .json(&body)
            .send()
            .await?;
        expect_ok(response).await
    }

    /// Password login; credentials are returned for the caller to persist.
    pub async fn login(&self, username: &str, password: &str) -> Result<Credentials, BackendError> {
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": username },
            "password": password,
        });
        let response = self
            .http
            .post(self.api_url(&["login"]))
            .json(&body)
            .send()
            .await?;
        let creds: Credentials = expect_ok(response).await?.json().await?;
        debug!(user_id = %creds.user_id, "logged in");
        Ok(creds)
    }

    /// Register a new account on the homeserver.
    pub async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Credentials, BackendError> {
        let body = json!({
            "auth": { "type": "m.login.dummy" },
            "username": username,
            "password": password,
        });
        let response = self
            .http
            .post(self.api_url(&["register"]))
            .json(&body)
            .send()
            .await?;
        let creds: Credentials = expect_ok(response).await?.json().await?;
        debug!(user_id = %creds.user_id, "registered");
        Ok(creds)
    }

    /// Quick connectivity and auth check.
    pub async fn check_status(&self) -> Result<ConnectionStatus, BackendError> {
        #[derive(Deserialize)]
        struct WhoAmI {
            user_id: String,
        }
        #[derive(Deserialize)]
        struct JoinedRooms {
            joined_rooms: Vec<String>,
        }

        let whoami: WhoAmI = self
            .get(self.api_url(&["account", "whoami"]))
            .await?
            .json()
            .await?;
        let rooms: JoinedRooms = self
            .get(self.api_url(&["joined_rooms"]))
            .await?
            .json()
            .await?;
        Ok(ConnectionStatus {
            user_id: whoami.user_id,
            rooms: rooms.joined_rooms.len(),
        })
    }

    /// Resolve a room alias to its room id; `None` when the alias is unknown.
    pub async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, BackendError> {
        #[derive(Deserialize)]
        struct Resolved {
            room_id: String,
        }

        let alias = self.full_alias(alias);
        let url = self.api_url(&["directory", "room", &alias]);
        let response = self.http.get(url).bearer_auth(self.token()?).send().await?;
        if response.status().as_u16() == 404 {
            return Ok(None);
        }
        let resolved: Resolved = expect_ok(response).await?.json().await?;
        Ok(Some(resolved.room_id))
    }

    pub async fn join(&self, room_id_or_alias: &str) -> Result<String, BackendError> {
        #[derive(Deserialize)]
        struct Joined {
            room_id: String,
        }

        let url = self.api_url(&["join", room_id_or_alias]);
        let joined: Joined = self.post(url, json!({})).await?.json().await?;
        Ok(joined.room_id)
    }

    /// Create a room carrying the given alias localpart.
    pub async fn create_room(
        &self,
        alias: &str,
        public: bool,
        topic: &str,
    ) -> Result<String, BackendError> {
        #[derive(Deserialize)]
        struct Created {
            room_id: String,
        }

        let local = alias
            .strip_prefix('#')
            .unwrap_or(alias)
            .split(':')
            .next()
            .unwrap_or_default();
        let mut body = json!({
            "room_alias_name": local,
            "visibility": if public { "public" } else { "private" },
        });
        if !topic.is_empty() {
            body["topic"] = json!(topic);
        }
        let created: Created = self
            .post(self.api_url(&["createRoom"]), body)
            .await?
            .json()
            .await?;
        debug!(room_id = %created.room_id, alias = %local, "created room");
        Ok(created.room_id)
    }

    /// Join a room by alias, creating it first if it does not exist yet.
    pub async fn join_or_create_room(
        &self,
        alias: &str,
        topic: &str,
    ) -> Result<String, BackendError> {
        if let Some(room_id) = self.resolve_alias(alias).await? {
            return self.join(&room_id).await;
        }
        debug!(%alias, "room does not exist, creating");
        let room_id = self.create_room(alias, true, topic).await?;
        self.join(&room_id).await
    }

    pub async fn room_members(&self, target: &Target) -> Result<Vec<RoomMember>, BackendError> {
        #[derive(Deserialize)]
        struct MemberInfo {
            #[serde(default)]
            display_name: Option<String>,
        }
        #[derive(Deserialize)]
        struct JoinedMembers {
            #[serde(default)]
            joined: BTreeMap<String, MemberInfo>,
        }

        let room_id = match self.room_id_for(target).await? {
            Some(room_id) => room_id,
            None => return Ok(Vec::new()),
        };
        let url = self.api_url(&["rooms", &room_id, "joined_members"]);
        let members: JoinedMembers = self.get(url).await?.json().await?;
        Ok(members
            .joined
            .into_iter()
            .map(|(user_id, info)| RoomMember {
                user_id,
                display_name: info.display_name,
            })
            .collect())
    }

    /// The DM room shared with `peer`, looked up in our `m.direct` account
    /// data and created (and recorded there) when absent.
    async fn dm_room_for(&self, peer: &str) -> Result<String, BackendError> {
        let user_id = self.full_user_id(peer);
        let me = self.own_user_id()?.to_string();
        let url = self.api_url(&["user", &me, "account_data", "m.direct"]);

        let response = self
            .http
            .get(url.clone())
            .bearer_auth(self.token()?)
            .send()
            .await?;
        let mut direct_map: BTreeMap<String, Vec<String>> =
            if response.status().as_u16() == 404 {
                BTreeMap::new()
            } else {
                expect_ok(response).await?.json().await.unwrap_or_default()
            };

        if let Some(room_id) = direct_map.get(&user_id).and_then(|rooms| rooms.first()) {
            return Ok(room_id.clone());
        }

        debug!(peer = %user_id, "creating new DM room");
        #[derive(Deserialize)]
        struct Created {
            room_id: String,
        }
        let created: Created = self
            .post(
                self.api_url(&["createRoom"]),
                json!({
                    "is_direct": true,
                    "preset": "trusted_private_chat",
                    "invite": [user_id.clone()],
                }),
            )
            .await?
            .json()
            .await?;

        direct_map
            .entry(user_id)
            .or_default()
            .push(created.room_id.clone());
        if let Err(err) = self.put(url, json!(direct_map)).await {
            warn!("could not record DM room in account data: {err}");
        }
        Ok(created.room_id)
    }

    async fn room_id_for(&self, target: &Target) -> Result<Option<String>, BackendError> {
        match target {
            Target::Channel(alias) => self.resolve_alias(alias).await,
            Target::Direct(peer) => self.dm_room_for(peer).await.map(Some),
        }
    }
}

#[async_trait]
impl ChatBackend for MatrixClient {
    async fn fetch_history(
        &self,
        target: &Target,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, BackendError> {
        #[derive(Deserialize)]
        struct Messages {
            #[serde(default)]
            chunk: Vec<Value>,
        }

        let room_id = match self.room_id_for(target).await? {
            Some(room_id) => room_id,
            // Unknown alias: nothing to read yet. Transport and auth errors
            // propagate; only the notify sweep downgrades them per target.
            None => return Ok(Vec::new()),
        };

        if let Err(err) = self.join(&room_id).await {
            warn!(%room_id, "could not join room before reading history: {err}");
        }

        let mut url = self.api_url(&["rooms", &room_id, "messages"]);
        url.query_pairs_mut()
            .append_pair("dir", "b")
            .append_pair("limit", &limit.to_string());
        let messages: Messages = self.get(url).await?.json().await?;
        Ok(parse_history_chunk(&messages.chunk))
    }

    async fn send_message(&self, target: &Target, text: &str) -> Result<(), BackendError> {
        let room_id = self
            .room_id_for(target)
            .await?
            .ok_or_else(|| BackendError::UnknownTarget(target.to_string()))?;
        self.join(&room_id).await?;

        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.api_url(&["rooms", &room_id, "send", "m.room.message", &txn_id]);
        let response = self
            .put(url, json!({ "msgtype": "m.text", "body": text }))
            .await?;

        #[derive(Deserialize)]
        struct Sent {
            event_id: String,
        }
        let sent: Sent = response.json().await?;
        debug!(%room_id, event_id = %sent.event_id, "sent message");
        Ok(())
    }
}

/// `/messages` returns newest-first; keep only text messages and flip the
/// window to the oldest-first order every consumer expects.
fn parse_history_chunk(chunk: &[Value]) -> Vec<ChatMessage> {
    let mut messages: Vec<ChatMessage> = chunk
        .iter()
        .filter(|event| event["type"].as_str() == Some("m.room.message"))
        .filter_map(|event| {
            let text = event["content"]["body"].as_str()?;
            Some(ChatMessage {
                sender: event["sender"].as_str().unwrap_or_default().to_string(),
                text: text.to_string(),
                event_id: event["event_id"].as_str().map(str::to_string),
                timestamp_ms: event["origin_server_ts"].as_i64(),
            })
        })
        .collect();
    messages.reverse();
    messages
}

async fn expect_ok(response: Response) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(BackendError::Auth(body)),
        _ => Err(BackendError::Unavailable(format!("{status}: {body}"))),
    }
}
