use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ias_auth::{
    Account, AccountStore, AccountTokens, AuthClient, AuthConfig, AuthContext, AuthData, AuthError,
    CancelFlag, CreateHandler, Crypt, DummyCrypt, Endpoints, LoginHandler, MicrosoftAccount,
    PasswordCrypt, Progress, SealedTokens, Stage, XHashedToken, keys, stages,
};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use url::Url;
use uuid::Uuid;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zeroize::Zeroizing;

const NOTCH_ID: &str = "069a79f444e94726a5befca90e38aaf5";
const EVENT_TIMEOUT: Duration = Duration::from_secs(20);

#[derive(Debug)]
enum Event {
    Created(MicrosoftAccount),
    LoggedIn(AuthData, bool),
    Failed(AuthError),
}

struct Recorder {
    cancel: CancelFlag,
    cancel_at: Option<&'static str>,
    password: Option<&'static str>,
    stages: Mutex<Vec<Stage>>,
    events: mpsc::UnboundedSender<Event>,
}

impl Recorder {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        Self::build(None, None)
    }

    fn build(
        cancel_at: Option<&'static str>,
        password: Option<&'static str>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Event>) {
        let (events, rx) = mpsc::unbounded_channel();
        let recorder = Self {
            cancel: CancelFlag::new(),
            cancel_at,
            password,
            stages: Mutex::new(Vec::new()),
            events,
        };
        (Arc::new(recorder), rx)
    }

    fn stage_keys(&self) -> Vec<&'static str> {
        self.stages.lock().unwrap().iter().map(|s| s.key).collect()
    }
}

impl Progress for Recorder {
    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn stage(&self, stage: Stage) {
        if self.cancel_at == Some(stage.key) {
            self.cancel.cancel();
        }
        self.stages.lock().unwrap().push(stage);
    }
}

impl CreateHandler for Recorder {
    fn success(&self, account: MicrosoftAccount) {
        let _ = self.events.send(Event::Created(account));
    }

    fn error(&self, error: AuthError) {
        let _ = self.events.send(Event::Failed(error));
    }
}

#[async_trait]
impl LoginHandler for Recorder {
    async fn password(&self) -> Option<Zeroizing<String>> {
        self.password.map(|p| Zeroizing::new(p.to_string()))
    }

    fn success(&self, data: AuthData, changed: bool) {
        let _ = self.events.send(Event::LoggedIn(data, changed));
    }

    fn error(&self, error: AuthError) {
        let _ = self.events.send(Event::Failed(error));
    }
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for a handler callback")
        .expect("handler channel closed")
}

async fn close(context: AuthContext) {
    tokio::task::spawn_blocking(move || context.close()).await.unwrap();
}

fn config(server: &MockServer) -> AuthConfig {
    AuthConfig {
        endpoints: Endpoints::with_base(&server.uri()),
        loopback_ports: 0..=0,
        ..AuthConfig::default()
    }
}

fn xbox_token(token: &str, uhs: &str) -> serde_json::Value {
    json!({
        "IssueInstant": "2024-01-01T00:00:00.0000000Z",
        "NotAfter": "2024-01-15T00:00:00.0000000Z",
        "Token": token,
        "DisplayClaims": { "xui": [{ "uhs": uhs }] }
    })
}

/// Mounts XBL through profile answering for `ms_access` and `mc_access`.
async fn mount_chain(server: &MockServer, ms_access: &str, mc_access: &str) {
    Mock::given(method("POST"))
        .and(path("/user/authenticate"))
        .and(body_string_contains(format!("d={ms_access}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token("xbl-token", "user-hash")))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .and(body_string_contains("xbl-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token("xsts-token", "user-hash")))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/authentication/login_with_xbox"))
        .and(body_string_contains("XBL3.0 x=user-hash;xsts-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "username": "00000000-0000-0000-0000-000000000000",
            "access_token": mc_access,
            "token_type": "Bearer",
            "expires_in": 86400
        })))
        .mount(server)
        .await;
    mount_profile(server, mc_access).await;
}

/// Mounts the entitlement and profile endpoints for `mc_access`.
async fn mount_profile(server: &MockServer, mc_access: &str) {
    let bearer = format!("Bearer {mc_access}");
    Mock::given(method("GET"))
        .and(path("/entitlements/mcstore"))
        .and(header("Authorization", bearer.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "name": "product_minecraft", "signature": "sig" },
                { "name": "game_minecraft", "signature": "sig" }
            ],
            "signature": "sig",
            "keyId": "1"
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/minecraft/profile"))
        .and(header("Authorization", bearer.as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": NOTCH_ID,
            "name": "Notch",
            "skins": [],
            "capes": []
        })))
        .mount(server)
        .await;
}

async fn mount_device_code(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/devicecode"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "device_code": "device-code",
            "user_code": "ABCD-EFGH",
            "verification_uri": "https://www.microsoft.com/link",
            "expires_in": 900,
            "interval": 1,
            "message": "To sign in, use a web browser to open the page"
        })))
        .expect(1)
        .mount(server)
        .await;
}

fn ms_tokens(access: &str, refresh: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "token_type": "bearer",
        "expires_in": 3600,
        "scope": "XboxLive.signin XboxLive.offline_access",
        "access_token": access,
        "refresh_token": refresh
    }))
}

/// Token endpoint answering `authorization_pending` `pending` times, then
/// granting. Records when each poll arrived.
#[derive(Clone)]
struct PollClock {
    pending: usize,
    times: Arc<Mutex<Vec<Instant>>>,
}

impl PollClock {
    fn new(pending: usize) -> Self {
        Self {
            pending,
            times: Arc::default(),
        }
    }

    fn times(&self) -> Vec<Instant> {
        self.times.lock().unwrap().clone()
    }
}

impl Respond for PollClock {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let mut times = self.times.lock().unwrap();
        times.push(Instant::now());
        if times.len() <= self.pending {
            ResponseTemplate::new(400).set_body_json(json!({
                "error": "authorization_pending",
                "error_description": "AADSTS70016: OAuth 2.0 device flow error."
            }))
        } else {
            ms_tokens("ms-access", "ms-refresh")
        }
    }
}

/// Waits until `recorder` reported `key`.
async fn reached(recorder: &Recorder, key: &str) {
    timeout(EVENT_TIMEOUT, async {
        while !recorder.stage_keys().contains(&key) {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("stage never reported");
}

fn notch() -> Uuid {
    Uuid::parse_str(NOTCH_ID).unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_device_flow_polls_until_granted() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    let polls = PollClock::new(2);
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/token"))
        .and(body_string_contains("device_code=device-code"))
        .respond_with(polls.clone())
        .expect(3)
        .mount(&server)
        .await;
    mount_chain(&server, "ms-access", "mc-access").await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    let started = Instant::now();
    context.create_device(Arc::new(DummyCrypt), recorder.clone());

    let Event::Created(account) = next_event(&mut events).await else {
        panic!("expected an account");
    };
    assert!(started.elapsed() >= Duration::from_secs(3));
    let times = polls.times();
    assert_eq!(times.len(), 3);
    assert!(times[0] - started >= Duration::from_secs(1));
    for gap in times.windows(2) {
        assert!(gap[1] - gap[0] >= Duration::from_secs(1), "polled after {:?}", gap[1] - gap[0]);
    }
    assert_eq!(account.name(), "Notch");
    assert_eq!(account.uuid(), notch());
    assert!(account.insecure());
    let tokens = account.tokens().open(&DummyCrypt).unwrap();
    assert_eq!(tokens, AccountTokens::new("mc-access", "ms-refresh"));

    assert_eq!(
        recorder.stage_keys(),
        vec![
            stages::INITIALIZING,
            stages::LINK_CLIENT,
            stages::PROCESSING,
            stages::MSA_TO_XBL,
            stages::XBL_TO_XSTS,
            stages::XSTS_TO_MCA,
            stages::ENTITLEMENTS,
            stages::MCA_TO_MCP,
            stages::ENCRYPTING,
            stages::FINALIZING,
        ]
    );
    let link = recorder.stages.lock().unwrap()[1].clone();
    assert_eq!(link.args, vec!["https://www.microsoft.com/link".to_string(), "ABCD-EFGH".to_string()]);

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_device_denial_stops_polling() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": "authorization_declined"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    context.create_device(Arc::new(DummyCrypt), recorder.clone());

    let Event::Failed(error) = next_event(&mut events).await else {
        panic!("expected a failure");
    };
    assert_eq!(error.friendly_key(), Some(keys::CANCEL));
    assert!(!recorder.stage_keys().contains(&stages::PROCESSING));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_stops_before_polling() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/token"))
        .respond_with(ms_tokens("ms-access", "ms-refresh"))
        .expect(0)
        .mount(&server)
        .await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::build(Some(stages::LINK_CLIENT), None);
    context.create_device(Arc::new(DummyCrypt), recorder.clone());
    reached(&recorder, stages::LINK_CLIENT).await;

    // Past the one second poll interval.
    let quiet = timeout(Duration::from_millis(1500), events.recv()).await;
    assert!(quiet.is_err(), "cancelled run reported {quiet:?}");
    assert_eq!(recorder.stage_keys().last(), Some(&stages::LINK_CLIENT));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancel_while_waiting_to_poll() {
    let server = MockServer::start().await;
    mount_device_code(&server).await;
    Mock::given(method("POST"))
        .and(path("/consumers/oauth2/v2.0/token"))
        .respond_with(PollClock::new(usize::MAX))
        .expect(1)
        .mount(&server)
        .await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    context.create_device(Arc::new(DummyCrypt), recorder.clone());

    timeout(EVENT_TIMEOUT, async {
        while server.received_requests().await.unwrap_or_default().len() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("first poll never arrived");
    recorder.cancel.cancel();

    let quiet = timeout(Duration::from_millis(1500), events.recv()).await;
    assert!(quiet.is_err(), "cancelled run reported {quiet:?}");
    assert!(!recorder.stage_keys().contains(&stages::PROCESSING));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_browser_flow() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth20_token.srf"))
        .and(body_string_contains("code=browser-code"))
        .and(body_string_contains("grant_type=authorization_code"))
        .respond_with(ms_tokens("ms-access", "ms-refresh"))
        .expect(1)
        .mount(&server)
        .await;
    mount_chain(&server, "ms-access", "mc-access").await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    let crypt = Arc::new(PasswordCrypt::with_iterations("secret", 16).unwrap());
    context.create_browser(crypt.clone(), recorder.clone(), |authorize| {
        let authorize = Url::parse(authorize).unwrap();
        let query = |name: &str| {
            authorize
                .query_pairs()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value.into_owned())
                .unwrap()
        };
        let redirect = Url::parse(&query("redirect_uri")).unwrap();
        let state = query("state");
        let port = redirect.port().unwrap();
        std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            let request = format!(
                "GET {}?code=browser-code&state={state} HTTP/1.1\r\nHost: localhost\r\n\r\n",
                redirect.path()
            );
            stream.write_all(request.as_bytes()).unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
        });
    });

    let Event::Created(account) = next_event(&mut events).await else {
        panic!("expected an account");
    };
    assert_eq!(account.name(), "Notch");
    assert!(!account.insecure());
    let tokens = account.tokens().open(crypt.as_ref()).unwrap();
    assert_eq!(tokens, AccountTokens::new("mc-access", "ms-refresh"));

    let keys = recorder.stage_keys();
    assert_eq!(&keys[..3], &[stages::INITIALIZING, stages::SERVER, stages::LINK]);
    assert!(keys.contains(&stages::MSAC_TO_MSA_MSR));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_xsts_child_account_is_friendly() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "Identity": "0",
            "XErr": 2148916238u64,
            "Message": "",
            "Redirect": "https://start.ui.xboxlive.com/AddChildToFamily"
        })))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.xsts_errors.insert(2148916227, "custom.banned");
    let client = AuthClient::new(Arc::new(config)).unwrap();
    let xbl = XHashedToken {
        token: "xbl-token".into(),
        hash: "user-hash".into(),
    };

    let error = client.xsts_authorize(&xbl).await.unwrap_err();
    assert_eq!(error.friendly_key(), Some(keys::XBOX_ADULT));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_xsts_unmapped_and_mismatched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .and(body_string_contains("unmapped"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "XErr": 2148916227u64 })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/xsts/authorize"))
        .respond_with(ResponseTemplate::new(200).set_body_json(xbox_token("xsts-token", "other-hash")))
        .mount(&server)
        .await;

    let client = AuthClient::new(Arc::new(config(&server))).unwrap();
    let unmapped = XHashedToken {
        token: "unmapped".into(),
        hash: "user-hash".into(),
    };
    let error = client.xsts_authorize(&unmapped).await.unwrap_err();
    assert!(matches!(error, AuthError::Unknown(_)));
    assert!(error.to_string().contains("2148916227"));

    let xbl = XHashedToken {
        token: "xbl-token".into(),
        hash: "user-hash".into(),
    };
    let error = client.xsts_authorize(&xbl).await.unwrap_err();
    assert!(matches!(error, AuthError::Unknown(_)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_ownership_and_profile_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entitlements/mcstore"))
        .and(header("Authorization", "Bearer demo"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/minecraft/profile"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "path": "/minecraft/profile",
            "error": "NOT_FOUND"
        })))
        .mount(&server)
        .await;

    let client = AuthClient::new(Arc::new(config(&server))).unwrap();
    let error = client.check_entitlements("demo").await.unwrap_err();
    assert_eq!(error.friendly_key(), Some(keys::GAME_NOT_OWNED));

    let error = client.fetch_profile("new-account").await.unwrap_err();
    assert_eq!(error.friendly_key(), Some(keys::NO_PROFILE));
}

async fn store_with(crypt: &dyn Crypt, tokens: AccountTokens, dir: &tempfile::TempDir) -> Arc<AccountStore> {
    let store = Arc::new(AccountStore::new(dir.path()));
    store.load().await.unwrap();
    let account = MicrosoftAccount::new(notch(), "Notch", SealedTokens::seal(crypt, &tokens).unwrap());
    store.add(account.into()).await.unwrap();
    store
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_with_valid_stored_token() {
    let server = MockServer::start().await;
    mount_profile(&server, "mc-access").await;
    Mock::given(method("POST"))
        .and(path("/oauth20_token.srf"))
        .respond_with(ms_tokens("unused", "unused"))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_with(&DummyCrypt, AccountTokens::new("mc-access", "ms-refresh"), &dir).await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    context.login(Arc::clone(&store), 0, recorder.clone());

    let Event::LoggedIn(data, changed) = next_event(&mut events).await else {
        panic!("expected a login");
    };
    assert!(!changed);
    assert_eq!(data.name, "Notch");
    assert_eq!(data.uuid, notch());
    assert_eq!(data.token, "mc-access");
    assert!(!recorder.stage_keys().contains(&stages::MSR_TO_MSA_MSR));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_refreshes_rejected_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entitlements/mcstore"))
        .and(header("Authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth20_token.srf"))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=ms-refresh"))
        .respond_with(ms_tokens("ms-access-2", "ms-refresh-2"))
        .expect(1)
        .mount(&server)
        .await;
    mount_chain(&server, "ms-access-2", "mc-access-2").await;

    let dir = tempfile::TempDir::new().unwrap();
    let crypt = PasswordCrypt::with_iterations("hunter2", 16).unwrap();
    let store = store_with(&crypt, AccountTokens::new("stale", "ms-refresh"), &dir).await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::build(None, Some("hunter2"));
    context.login(Arc::clone(&store), 0, recorder.clone());

    let Event::LoggedIn(data, changed) = next_event(&mut events).await else {
        panic!("expected a login");
    };
    assert!(changed);
    assert_eq!(data.token, "mc-access-2");

    let keys = recorder.stage_keys();
    assert_eq!(&keys[..2], &[stages::INITIALIZING, stages::DECRYPTING]);
    assert!(keys.contains(&stages::MSR_TO_MSA_MSR));
    assert_eq!(keys.last(), Some(&stages::FINALIZING));

    let Some(Account::Microsoft(stored)) = store.get(0).await else {
        panic!("expected the stored account");
    };
    assert_eq!(
        stored.tokens().open(&crypt).unwrap(),
        AccountTokens::new("mc-access-2", "ms-refresh-2")
    );

    let reopened = AccountStore::new(dir.path());
    reopened.load().await.unwrap();
    assert_eq!(reopened.accounts().await.len(), 1);

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rotated_refresh_token_survives_later_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/entitlements/mcstore"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/oauth20_token.srf"))
        .and(body_string_contains("refresh_token=ms-refresh"))
        .respond_with(ms_tokens("ms-access-2", "ms-refresh-2"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/user/authenticate"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let dir = tempfile::TempDir::new().unwrap();
    let store = store_with(&DummyCrypt, AccountTokens::new("stale", "ms-refresh"), &dir).await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::new();
    context.login(Arc::clone(&store), 0, recorder.clone());

    let Event::Failed(_) = next_event(&mut events).await else {
        panic!("expected a failure");
    };
    let Some(Account::Microsoft(stored)) = store.get(0).await else {
        panic!("expected the stored account");
    };
    assert_eq!(stored.name(), "Notch");
    assert_eq!(
        stored.tokens().open(&DummyCrypt).unwrap(),
        AccountTokens::new("stale", "ms-refresh-2")
    );

    let reopened = AccountStore::new(dir.path());
    reopened.load().await.unwrap();
    let Some(Account::Microsoft(persisted)) = reopened.get(0).await else {
        panic!("expected the persisted account");
    };
    assert_eq!(persisted.tokens().open(&DummyCrypt).unwrap().refresh, "ms-refresh-2");

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_wrong_password() {
    let server = MockServer::start().await;
    let dir = tempfile::TempDir::new().unwrap();
    let crypt = PasswordCrypt::with_iterations("hunter2", 16).unwrap();
    let store = store_with(&crypt, AccountTokens::new("mc-access", "ms-refresh"), &dir).await;

    let context = AuthContext::new(config(&server)).unwrap();
    let (recorder, mut events) = Recorder::build(None, Some("hunter3"));
    context.login(store, 0, recorder.clone());

    let Event::Failed(error) = next_event(&mut events).await else {
        panic!("expected a failure");
    };
    assert_eq!(error.friendly_key(), Some(keys::BAD_PASSWORD));

    close(context).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_profile_lookup_on_worker() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/users/profiles/minecraft/Notch"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": NOTCH_ID, "name": "Notch" })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/users/profiles/minecraft/nobody_here"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let context = AuthContext::new(config(&server)).unwrap();
    let found = context
        .execute(|client| async move { client.profile_by_name("Notch").await })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.map(|p| p.uuid), Some(notch()));

    let missing = context
        .execute(|client| async move { client.profile_by_name("nobody_here").await })
        .await
        .unwrap()
        .unwrap();
    assert!(missing.is_none());

    close(context).await;
}
