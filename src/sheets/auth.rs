//! Google OAuth 認証処理（インストールアプリフロー）

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, TimeDelta, Utc};
use rand::{distributions::Alphanumeric, Rng};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// 有効期限のこの時間前から期限切れとみなす
const REFRESH_THRESHOLD_SECS: i64 = 225;

const CALLBACK_PAGE: &str = "認証が完了しました。このウィンドウを閉じてください。";

/// OAuth クライアント情報 (credentials.json の installed / web セクション)
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Debug, Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ClientSecrets {
    /// credentials.json を読み込み
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("OAuthクライアント設定の読み込みに失敗: {:?}", path))?;
        let file: ClientSecretsFile = serde_json::from_str(&text)
            .with_context(|| format!("OAuthクライアント設定のパースに失敗: {:?}", path))?;

        file.installed
            .or(file.web)
            .with_context(|| format!("installed / web セクションがありません: {:?}", path))
    }

    /// 認可画面のURLを組み立て
    fn authorization_url(&self, redirect_uri: &str, scopes: &[String], state: &str) -> Result<Url> {
        let scope = scopes.join(" ");
        Url::parse_with_params(
            &self.auth_uri,
            &[
                ("response_type", "code"),
                ("client_id", self.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .with_context(|| format!("認可URLの生成に失敗: {}", self.auth_uri))
    }
}

/// 保存される認証情報 (token.json)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

impl Credential {
    /// 有効期限切れかどうか（期限なしは期限切れにならない）
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now >= expiry - Duration::seconds(REFRESH_THRESHOLD_SECS),
            None => false,
        }
    }

    /// そのまま使えるかどうか
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.token.is_some() && !self.is_expired(now)
    }

    pub fn access_token(&self) -> Result<&str> {
        self.token.as_deref().context("アクセストークンがありません")
    }

    fn apply(&mut self, response: TokenResponse, now: DateTime<Utc>) -> Result<()> {
        self.expiry = match response.expires_in {
            Some(secs) => Some(
                TimeDelta::try_seconds(secs)
                    .and_then(|d| now.checked_add_signed(d))
                    .with_context(|| format!("expires_in が範囲外です: {}", secs))?,
            ),
            None => None,
        };
        self.token = Some(response.access_token);
        if response.refresh_token.is_some() {
            self.refresh_token = response.refresh_token;
        }
        if let Some(scope) = response.scope {
            self.scopes = scope.split_whitespace().map(str::to_string).collect();
        }
        Ok(())
    }

    /// token.json を読み込み（存在しなければ None）
    pub fn load(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("トークンファイルの読み込みに失敗: {:?}", path))?;
        let credential = serde_json::from_str(&text)
            .with_context(|| format!("トークンファイルのパースに失敗: {:?}", path))?;
        Ok(Some(credential))
    }

    /// token.json へ保存
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).context("トークンのシリアライズに失敗")?;
        std::fs::write(path, text)
            .with_context(|| format!("トークンファイルの書き込みに失敗: {:?}", path))
    }
}

/// トークンエンドポイントのレスポンス
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
    #[allow(dead_code)]
    token_type: Option<String>,
}

/// 認証情報の取得方法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    /// 保存済みトークンをそのまま使用
    Cached,
    /// リフレッシュトークンで更新
    Refreshed,
    /// ブラウザで新たに認可
    Authorized,
}

/// 認証結果
#[derive(Debug)]
pub struct Authorized {
    pub credential: Credential,
    pub outcome: AuthOutcome,
}

/// 認可URLを開く処理
type BrowserOpener = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// 認証処理
pub struct Authenticator {
    token_path: PathBuf,
    secrets_path: PathBuf,
    scopes: Vec<String>,
    http_client: reqwest::Client,
    open_browser: BrowserOpener,
}

impl Authenticator {
    pub fn new(
        token_path: impl AsRef<Path>,
        secrets_path: impl AsRef<Path>,
        scopes: Vec<String>,
    ) -> Self {
        Self {
            token_path: token_path.as_ref().to_path_buf(),
            secrets_path: secrets_path.as_ref().to_path_buf(),
            scopes,
            http_client: reqwest::Client::new(),
            open_browser: Box::new(|url: &str| open::that(url)),
        }
    }

    pub fn with_http_client(mut self, http_client: reqwest::Client) -> Self {
        self.http_client = http_client;
        self
    }

    /// 認可URLの開き方を差し替え（既定はシステムのブラウザ）
    pub fn with_browser(
        mut self,
        open_browser: impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.open_browser = Box::new(open_browser);
        self
    }

    /// 有効な認証情報を取得
    ///
    /// 保存済みトークンが有効ならそのまま、期限切れでリフレッシュトークンがあれば更新、
    /// それ以外はブラウザで認可する。変更があれば token.json を書き直す。
    pub async fn authorize(&self) -> Result<Authorized> {
        let cached = Credential::load(&self.token_path)?;

        if let Some(credential) = cached.as_ref() {
            if credential.is_valid(Utc::now()) {
                tracing::debug!("保存済みトークンを使用");
                return Ok(Authorized {
                    credential: credential.clone(),
                    outcome: AuthOutcome::Cached,
                });
            }
        }

        let (credential, outcome) = match cached {
            Some(mut credential)
                if credential.is_expired(Utc::now()) && credential.refresh_token.is_some() =>
            {
                self.refresh(&mut credential).await?;
                (credential, AuthOutcome::Refreshed)
            }
            _ => (self.run_installed_flow().await?, AuthOutcome::Authorized),
        };

        credential.save(&self.token_path)?;
        tracing::info!("トークンを保存しました: {:?}", self.token_path);

        Ok(Authorized { credential, outcome })
    }

    /// リフレッシュトークンでアクセストークンを更新
    async fn refresh(&self, credential: &mut Credential) -> Result<()> {
        let refresh_token = credential
            .refresh_token
            .clone()
            .context("リフレッシュトークンがありません")?;

        let response = self
            .http_client
            .post(&credential.token_uri)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.as_str()),
                ("client_id", credential.client_id.as_str()),
                ("client_secret", credential.client_secret.as_str()),
            ])
            .send()
            .await
            .context("トークン更新リクエストに失敗")?;

        let token_response = parse_token_response(response).await?;
        credential.apply(token_response, Utc::now())?;
        tracing::info!("アクセストークンを更新しました");
        Ok(())
    }

    /// ブラウザで認可してトークンを取得
    async fn run_installed_flow(&self) -> Result<Credential> {
        let secrets = ClientSecrets::from_file(&self.secrets_path)?;

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("コールバック用ポートの確保に失敗")?;
        let port = listener.local_addr()?.port();
        let redirect_uri = format!("http://localhost:{}/", port);

        let state: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(30)
            .map(char::from)
            .collect();
        let auth_url = secrets.authorization_url(&redirect_uri, &self.scopes, &state)?;

        println!("ブラウザで次のURLを開いて認証してください:\n{}", auth_url);
        if let Err(e) = (self.open_browser)(auth_url.as_str()) {
            tracing::warn!("ブラウザを開けませんでした: {}", e);
        }

        let code = wait_for_code(&listener, &state).await?;

        let response = self
            .http_client
            .post(&secrets.token_uri)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code.as_str()),
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .send()
            .await
            .context("トークンリクエストに失敗")?;

        let token_response = parse_token_response(response).await?;

        let mut credential = Credential {
            token: None,
            refresh_token: None,
            token_uri: secrets.token_uri,
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            scopes: self.scopes.clone(),
            expiry: None,
        };
        credential.apply(token_response, Utc::now())?;
        Ok(credential)
    }
}

async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
    if !response.status().is_success() {
        let status = response.status();
        let error_text = response.text().await.unwrap_or_default();
        anyhow::bail!("トークンエンドポイント エラー ({}): {}", status, error_text);
    }

    response
        .json()
        .await
        .context("トークンレスポンスのパースに失敗")
}

/// コールバックを待ち、認可コードを受け取る
///
/// 空の接続や読めないリクエストは無視して待ち続ける。
async fn wait_for_code(listener: &TcpListener, state: &str) -> Result<String> {
    loop {
        let (stream, _) = listener.accept().await.context("コールバックの受信に失敗")?;
        let mut reader = BufReader::new(stream);

        let Some(request_line) = read_request(&mut reader).await else {
            tracing::debug!("空のコールバック接続を無視");
            continue;
        };

        let result = parse_callback(&request_line, state);
        let body = match &result {
            Ok(Some(_)) => CALLBACK_PAGE.to_string(),
            Ok(None) => String::new(),
            Err(e) => format!("認証に失敗しました: {}", e),
        };
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        let mut stream = reader.into_inner();
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            tracing::debug!("コールバック応答の送信に失敗: {}", e);
        }
        stream.shutdown().await.ok();

        if let Some(code) = result? {
            return Ok(code);
        }
    }
}

/// リクエスト行を読み、残りのヘッダーを読み捨てる（読めなければ None）
async fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
    let mut request_line = String::new();
    match reader.read_line(&mut request_line).await {
        Ok(n) if n > 0 => {}
        _ => return None,
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(n) if n > 0 && line != "\r\n" => {}
            Ok(_) => break,
            Err(_) => return None,
        }
    }
    Some(request_line)
}

/// コールバックのリクエスト行から認可コードを取り出す
///
/// code も error も含まないリクエスト (favicon や不正な行など) は None。
fn parse_callback(request_line: &str, expected_state: &str) -> Result<Option<String>> {
    let Some(target) = request_line.split_whitespace().nth(1) else {
        return Ok(None);
    };
    let Ok(url) = Url::parse(&format!("http://localhost{}", target)) else {
        return Ok(None);
    };

    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        anyhow::bail!("認可が拒否されました: {}", error);
    }
    let Some(code) = code else {
        return Ok(None);
    };
    if state.as_deref() != Some(expected_state) {
        anyhow::bail!("state が一致しません");
    }
    Ok(Some(code))
}
