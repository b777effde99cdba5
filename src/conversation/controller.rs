use std::future::IntoFuture;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{self, BoxFuture, FutureExt};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Conversation, ConversationSnapshot, RegenerateFailurePolicy};
use crate::agent::CompletionClient;
use crate::errors::AppError;
use crate::models::{MessageId, Sender};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerSettings {
    pub request_timeout: Duration,
    pub regenerate_failure_policy: RegenerateFailurePolicy,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(60),
            regenerate_failure_policy: RegenerateFailurePolicy::Silent,
        }
    }
}

/// Why an operation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    EmptyInput,
    Busy,
    EmptyConversation,
    NoUserTurn,
    Closed,
}

/// How a `submit` or `regenerate` call ended. Failures are reported here,
/// never as an `Err`.
#[derive(Debug)]
pub enum Outcome {
    Replied(MessageId),
    Failed(AppError),
    Cancelled,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnKind {
    Submit,
    Regenerate,
}

impl TurnKind {
    fn as_str(self) -> &'static str {
        match self {
            TurnKind::Submit => "submit",
            TurnKind::Regenerate => "regenerate",
        }
    }
}

struct State {
    conversation: Conversation,
    pending: bool,
    closed: bool,
    in_flight: Option<CancellationToken>,
}

impl State {
    fn busy_reason(&self) -> Option<SkipReason> {
        if self.closed {
            Some(SkipReason::Closed)
        } else if self.pending {
            Some(SkipReason::Busy)
        } else {
            None
        }
    }

    fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.conversation.messages().to_vec(),
            pending: self.pending,
        }
    }
}

struct Inner {
    client: Arc<dyn CompletionClient>,
    settings: ControllerSettings,
    state: Mutex<State>,
    session: CancellationToken,
    updates: watch::Sender<ConversationSnapshot>,
}

impl Inner {
    // Never held across an await.
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &State) {
        self.updates.send_replace(state.snapshot());
    }

    fn append_bot(&self, text: String) -> MessageId {
        let mut state = self.lock();
        let id = state.conversation.push(Sender::Bot, text);
        self.publish(&state);
        id
    }

    /// One attempt, bounded by the request timeout and the cancel token.
    async fn request(&self, prompt: &str, token: &CancellationToken) -> Result<String, AppError> {
        let limit = self.settings.request_timeout;
        let call = tokio::time::timeout(limit, self.client.complete(prompt));

        tokio::select! {
            biased;
            _ = token.cancelled() => Err(AppError::Cancelled),
            result = call => match result {
                Err(_) => Err(AppError::Timeout { seconds: limit.as_secs() }),
                Ok(Ok(text)) if text.trim().is_empty() => Err(AppError::EmptyResponse),
                Ok(reply) => reply,
            },
        }
    }
}

/// A round trip that got past the pending gate. It owns the `pending` flag:
/// dropping it, run or not, clears the flag.
struct Turn {
    inner: Arc<Inner>,
    kind: TurnKind,
    prompt: String,
    token: CancellationToken,
}

impl Turn {
    async fn run(self) -> Outcome {
        let kind = self.kind.as_str();
        let e = match self.inner.request(&self.prompt, &self.token).await {
            Ok(reply) => {
                let mut state = self.inner.lock();
                let replaced = match self.kind {
                    TurnKind::Submit => None,
                    TurnKind::Regenerate => {
                        state.conversation.remove_last_from(Sender::Bot).map(|m| m.id)
                    }
                };
                let id = state.conversation.push(Sender::Bot, reply);
                self.inner.publish(&state);
                info!(%id, ?replaced, kind, "reply appended");
                return Outcome::Replied(id);
            }
            Err(AppError::Cancelled) => {
                info!(kind, "request cancelled");
                return Outcome::Cancelled;
            }
            Err(e) => e,
        };

        if e.is_service_failure() {
            warn!(kind, "completion failed: {e}");
        } else {
            error!(kind, "request failed outside the completion service: {e}");
        }

        match (self.kind, self.inner.settings.regenerate_failure_policy) {
            (TurnKind::Regenerate, RegenerateFailurePolicy::Silent) => {
                debug!("keeping previous reply");
            }
            _ => {
                self.inner.append_bot(format!("Error: {e}"));
            }
        }
        Outcome::Failed(e)
    }
}

impl Drop for Turn {
    fn drop(&mut self) {
        let mut state = self.inner.lock();
        state.pending = false;
        state.in_flight = None;
        self.inner.publish(&state);
    }
}

/// A `submit` or `regenerate` call. The pending gate was checked, and the
/// user turn appended, when the call was made; awaiting it performs the
/// round trip. Dropping an admitted request without awaiting it releases
/// the gate with no bot turn.
#[must_use = "an admitted request holds the pending flag until it is awaited or dropped"]
pub struct Request(Result<Turn, SkipReason>);

impl Request {
    /// Whether the call got past the gate and will contact the service.
    pub fn is_admitted(&self) -> bool {
        self.0.is_ok()
    }
}

impl IntoFuture for Request {
    type Output = Outcome;
    type IntoFuture = BoxFuture<'static, Outcome>;

    fn into_future(self) -> Self::IntoFuture {
        match self.0 {
            Ok(turn) => turn.run().boxed(),
            Err(reason) => future::ready(Outcome::Skipped(reason)).boxed(),
        }
    }
}

/// Owns one session's [`Conversation`] and gates completion round trips
/// with the `pending` flag. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct ConversationController {
    inner: Arc<Inner>,
}

impl ConversationController {
    pub fn new(client: Arc<dyn CompletionClient>, settings: ControllerSettings) -> Self {
        let (updates, _) = watch::channel(ConversationSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                client,
                settings,
                state: Mutex::new(State {
                    conversation: Conversation::new(),
                    pending: false,
                    closed: false,
                    in_flight: None,
                }),
                session: CancellationToken::new(),
                updates,
            }),
        }
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> ConversationSnapshot {
        self.inner.lock().snapshot()
    }

    /// Notified after every mutation of the log or the pending flag.
    pub fn subscribe(&self) -> watch::Receiver<ConversationSnapshot> {
        self.inner.updates.subscribe()
    }

    /// Appends `text` as a user turn right away; the returned request appends
    /// the service's reply (or the error it produced) as a bot turn.
    pub fn submit(&self, text: &str) -> Request {
        if text.trim().is_empty() {
            debug!("submit skipped: empty input");
            return Request(Err(SkipReason::EmptyInput));
        }

        let mut state = self.inner.lock();
        if let Some(reason) = state.busy_reason() {
            debug!(?reason, "submit skipped");
            return Request(Err(reason));
        }
        state.conversation.push(Sender::User, text);
        Request(Ok(self.start(&mut state, TurnKind::Submit, text.to_string())))
    }

    /// Re-asks the most recent user turn; the returned request replaces the
    /// most recent bot turn with the answer. The replacement gets a fresh id
    /// and timestamp.
    pub fn regenerate(&self) -> Request {
        let mut state = self.inner.lock();
        if let Some(reason) = state.busy_reason() {
            debug!(?reason, "regenerate skipped");
            return Request(Err(reason));
        }
        if state.conversation.is_empty() {
            debug!("regenerate skipped: empty conversation");
            return Request(Err(SkipReason::EmptyConversation));
        }
        let Some(prompt) = state.conversation.last_from(Sender::User).map(|m| m.text.clone()) else {
            debug!("regenerate skipped: no user turn");
            return Request(Err(SkipReason::NoUserTurn));
        };
        Request(Ok(self.start(&mut state, TurnKind::Regenerate, prompt)))
    }

    /// Aborts the in-flight request. Returns whether there was one.
    pub fn cancel(&self) -> bool {
        match &self.inner.lock().in_flight {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Session teardown: cancels anything in flight and refuses further work.
    pub fn shutdown(&self) {
        self.inner.lock().closed = true;
        self.inner.session.cancel();
        debug!("conversation controller shut down");
    }

    fn start(&self, state: &mut State, kind: TurnKind, prompt: String) -> Turn {
        let token = self.inner.session.child_token();
        state.pending = true;
        state.in_flight = Some(token.clone());
        self.inner.publish(state);
        Turn { inner: self.inner.clone(), kind, prompt, token }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{fail, text, Reply, ScriptedClient};
    use pretty_assertions::assert_eq;
    use std::collections::HashSet;

    fn controller(client: &Arc<ScriptedClient>) -> ConversationController {
        ConversationController::new(client.clone(), ControllerSettings::default())
    }

    fn transcript(controller: &ConversationController) -> Vec<(Sender, String)> {
        controller
            .snapshot()
            .messages
            .into_iter()
            .map(|m| (m.sender, m.text))
            .collect()
    }

    fn turns(pairs: &[(Sender, &str)]) -> Vec<(Sender, String)> {
        pairs.iter().map(|(s, t)| (*s, t.to_string())).collect()
    }

    // =========================================================================
    // submit
    // =========================================================================

    #[tokio::test]
    async fn submit_ignores_blank_input() {
        let client = Arc::new(ScriptedClient::new([text("unused")]));
        let controller = controller(&client);

        for input in ["", "   ", "\n\t "] {
            let outcome = controller.submit(input).await;
            assert!(matches!(outcome, Outcome::Skipped(SkipReason::EmptyInput)));
        }
        assert!(controller.snapshot().messages.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn submit_appends_user_then_bot() {
        let client = Arc::new(ScriptedClient::new([text("Hi there!")]));
        let controller = controller(&client);

        let outcome = controller.submit("hello").await;

        assert!(matches!(outcome, Outcome::Replied(_)));
        assert_eq!(
            transcript(&controller),
            turns(&[(Sender::User, "hello"), (Sender::Bot, "Hi there!")])
        );
        assert_eq!(client.prompts(), ["hello"]);
        assert!(!controller.snapshot().pending);
    }

    #[tokio::test]
    async fn submit_sends_the_raw_text() {
        let client = Arc::new(ScriptedClient::new([text("ok")]));
        let controller = controller(&client);

        controller.submit("  spaced out  ").await;

        assert_eq!(client.prompts(), ["  spaced out  "]);
        assert_eq!(controller.snapshot().messages[0].text, "  spaced out  ");
    }

    #[tokio::test]
    async fn submit_failure_becomes_an_error_turn() {
        let client = Arc::new(ScriptedClient::new([fail("timeout")]));
        let controller = controller(&client);

        let outcome = controller.submit("hello").await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        let messages = controller.snapshot().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[1].sender, Sender::Bot);
        assert!(messages[1].text.contains("timeout"));
        assert!(messages[1].text.starts_with("Error: "));
        assert!(!controller.snapshot().pending);
    }

    #[tokio::test]
    async fn empty_reply_is_a_failure() {
        let client = Arc::new(ScriptedClient::new([text("  \n")]));
        let controller = controller(&client);

        let outcome = controller.submit("hello").await;

        assert!(matches!(outcome, Outcome::Failed(AppError::EmptyResponse)));
        assert_eq!(controller.snapshot().messages[1].text, "Error: No response text");
    }

    #[tokio::test]
    async fn history_is_not_sent_to_the_service() {
        let client = Arc::new(ScriptedClient::new([text("one"), text("two")]));
        let controller = controller(&client);

        controller.submit("first").await;
        controller.submit("second").await;

        assert_eq!(client.prompts(), ["first", "second"]);
    }

    #[tokio::test]
    async fn ids_stay_unique_across_a_thousand_sends() {
        let client = Arc::new(ScriptedClient::new((0..1000).map(|i| Reply::Text(format!("r{i}")))));
        let controller = controller(&client);

        for i in 0..1000 {
            controller.submit(&format!("m{i}")).await;
        }

        let messages = controller.snapshot().messages;
        assert_eq!(messages.len(), 2000);
        let ids: HashSet<_> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids.len(), 2000);
    }

    // =========================================================================
    // regenerate
    // =========================================================================

    #[tokio::test]
    async fn regenerate_on_empty_conversation_is_a_no_op() {
        let client = Arc::new(ScriptedClient::new([text("unused")]));
        let controller = controller(&client);

        let outcome = controller.regenerate().await;

        assert!(matches!(outcome, Outcome::Skipped(SkipReason::EmptyConversation)));
        assert!(controller.snapshot().messages.is_empty());
        assert_eq!(client.calls(), 0);
    }

    #[tokio::test]
    async fn regenerate_replaces_the_last_bot_turn() {
        let client = Arc::new(ScriptedClient::new([text("B1"), text("B2")]));
        let controller = controller(&client);
        controller.submit("A").await;
        let old = controller.snapshot().messages[1].clone();

        let outcome = controller.regenerate().await;

        assert!(matches!(outcome, Outcome::Replied(_)));
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A"), (Sender::Bot, "B2")]));
        let new = controller.snapshot().messages[1].clone();
        assert_ne!(new.id, old.id);
        assert!(new.timestamp >= old.timestamp);
        assert_eq!(client.prompts(), ["A", "A"]);
    }

    #[tokio::test]
    async fn regenerate_uses_the_most_recent_user_turn() {
        let client = Arc::new(ScriptedClient::new([text("r1"), text("r2"), text("r2b")]));
        let controller = controller(&client);
        controller.submit("first").await;
        controller.submit("second").await;

        controller.regenerate().await;

        assert_eq!(client.prompts().last().map(String::as_str), Some("second"));
        assert_eq!(
            transcript(&controller),
            turns(&[
                (Sender::User, "first"),
                (Sender::Bot, "r1"),
                (Sender::User, "second"),
                (Sender::Bot, "r2b"),
            ])
        );
    }

    #[tokio::test]
    async fn failed_regenerate_leaves_the_conversation_alone() {
        let client = Arc::new(ScriptedClient::new([text("B1"), fail("quota exceeded")]));
        let controller = controller(&client);
        controller.submit("A").await;
        let before = controller.snapshot();

        let outcome = controller.regenerate().await;

        assert!(matches!(outcome, Outcome::Failed(_)));
        assert_eq!(controller.snapshot(), before);
    }

    #[tokio::test]
    async fn visible_policy_surfaces_regenerate_failures() {
        let client = Arc::new(ScriptedClient::new([text("B1"), fail("quota exceeded")]));
        let controller = ConversationController::new(
            client.clone(),
            ControllerSettings {
                regenerate_failure_policy: RegenerateFailurePolicy::Visible,
                ..Default::default()
            },
        );
        controller.submit("A").await;

        controller.regenerate().await;

        let messages = controller.snapshot().messages;
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[1].text, "B1");
        assert!(messages[2].text.contains("quota exceeded"));
    }

    #[tokio::test]
    async fn regenerate_without_a_bot_turn_still_appends() {
        // The first reply was swallowed by a cancel, leaving only the user turn.
        let client = Arc::new(ScriptedClient::gated([text("fresh")]));
        let controller = controller(&client);
        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit("A").await }
        });
        client.entered.notified().await;
        controller.cancel();
        assert!(matches!(task.await.unwrap(), Outcome::Cancelled));

        let regen = tokio::spawn({
            let controller = controller.clone();
            async move { controller.regenerate().await }
        });
        client.entered.notified().await;
        client.release();
        assert!(matches!(regen.await.unwrap(), Outcome::Replied(_)));

        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A"), (Sender::Bot, "fresh")]));
    }

    // =========================================================================
    // pending gate, cancellation, teardown
    // =========================================================================

    #[tokio::test]
    async fn calls_while_pending_are_rejected() {
        let client = Arc::new(ScriptedClient::gated([text("slow reply")]));
        let controller = controller(&client);
        let first = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit("A").await }
        });
        client.entered.notified().await;
        let during = controller.snapshot();
        assert!(during.pending);

        assert!(matches!(controller.submit("B").await, Outcome::Skipped(SkipReason::Busy)));
        assert!(matches!(controller.regenerate().await, Outcome::Skipped(SkipReason::Busy)));
        assert_eq!(controller.snapshot(), during);
        assert_eq!(client.calls(), 1);

        client.release();
        assert!(matches!(first.await.unwrap(), Outcome::Replied(_)));
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A"), (Sender::Bot, "slow reply")]));
        assert!(!controller.snapshot().pending);
    }

    #[tokio::test]
    async fn admission_happens_before_the_request_is_awaited() {
        let client = Arc::new(ScriptedClient::new([text("first"), text("unused")]));
        let controller = controller(&client);

        let first = controller.submit("A");
        let second = controller.submit("B");

        assert!(first.is_admitted());
        assert!(!second.is_admitted());
        assert!(controller.snapshot().pending);
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A")]));
        assert!(matches!(second.await, Outcome::Skipped(SkipReason::Busy)));

        assert!(matches!(first.await, Outcome::Replied(_)));
        assert_eq!(client.prompts(), ["A"]);
    }

    #[tokio::test]
    async fn cancel_before_the_request_runs_skips_the_service() {
        let client = Arc::new(ScriptedClient::new([text("never shown")]));
        let controller = controller(&client);

        let request = controller.submit("A");
        assert!(controller.cancel());

        assert!(matches!(request.await, Outcome::Cancelled));
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A")]));
        assert_eq!(client.calls(), 0);
        assert!(!controller.snapshot().pending);
    }

    #[tokio::test]
    async fn dropping_an_admitted_request_releases_the_gate() {
        let client = Arc::new(ScriptedClient::new([text("B1")]));
        let controller = controller(&client);

        drop(controller.submit("A"));
        assert!(!controller.snapshot().pending);

        assert!(matches!(controller.regenerate().await, Outcome::Replied(_)));
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "A"), (Sender::Bot, "B1")]));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_service_is_cut_off_by_the_timeout() {
        let client = Arc::new(ScriptedClient::new([Reply::Hang]));
        let controller = ConversationController::new(
            client.clone(),
            ControllerSettings { request_timeout: Duration::from_secs(5), ..Default::default() },
        );

        let outcome = controller.submit("hello").await;

        assert!(matches!(outcome, Outcome::Failed(AppError::Timeout { seconds: 5 })));
        let messages = controller.snapshot().messages;
        assert!(messages[1].text.contains("timed out after 5s"));
        assert!(!controller.snapshot().pending);
    }

    #[tokio::test]
    async fn cancel_aborts_the_in_flight_submit() {
        let client = Arc::new(ScriptedClient::new([Reply::Hang]));
        let controller = controller(&client);
        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit("hello").await }
        });
        client.entered.notified().await;

        assert!(controller.cancel());

        assert!(matches!(task.await.unwrap(), Outcome::Cancelled));
        assert_eq!(transcript(&controller), turns(&[(Sender::User, "hello")]));
        assert!(!controller.snapshot().pending);
        assert!(!controller.cancel());
    }

    #[tokio::test]
    async fn cancel_then_submit_works_again() {
        let client = Arc::new(ScriptedClient::new([Reply::Hang, text("second try")]));
        let controller = controller(&client);
        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit("one").await }
        });
        client.entered.notified().await;
        controller.cancel();
        task.await.unwrap();

        let outcome = controller.submit("two").await;

        assert!(matches!(outcome, Outcome::Replied(_)));
        assert_eq!(
            transcript(&controller),
            turns(&[(Sender::User, "one"), (Sender::User, "two"), (Sender::Bot, "second try")])
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_and_closes() {
        let client = Arc::new(ScriptedClient::new([Reply::Hang]));
        let controller = controller(&client);
        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.submit("hello").await }
        });
        client.entered.notified().await;

        controller.shutdown();

        assert!(matches!(task.await.unwrap(), Outcome::Cancelled));
        assert!(matches!(controller.submit("again").await, Outcome::Skipped(SkipReason::Closed)));
        assert!(matches!(controller.regenerate().await, Outcome::Skipped(SkipReason::Closed)));
        assert_eq!(client.calls(), 1);
    }

    #[tokio::test]
    async fn subscribers_see_the_final_state() {
        let client = Arc::new(ScriptedClient::new([text("pong")]));
        let controller = controller(&client);
        let mut updates = controller.subscribe();

        controller.submit("ping").await;

        assert!(updates.has_changed().unwrap());
        let snapshot = updates.borrow_and_update().clone();
        assert_eq!(snapshot.messages.len(), 2);
        assert!(!snapshot.pending);
    }
}
