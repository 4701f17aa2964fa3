//! Rerun driver
//!
//! An app is a script body that re-executes from the top on every
//! interaction. The driver binds each run to the viewer's session store and
//! the shared memo cache, and guarantees that runs of the same session never
//! interleave: a new trigger waits for the in-flight run to finish.
//!
//! Per-session lifecycle: `Idle -> Running -> Idle`, with `Destroyed` as the
//! terminal state once the session is torn down.
//!
//! Order of work for a widget change:
//! 1. The widget's new value is committed to the session store
//! 2. The callback the widget declared in the previous run (if any) runs
//! 3. The script body reruns from the top

use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{EncoreError, Result};
use crate::fingerprint::{Args, Fingerprint, FunctionIdentity};
use crate::logging::{operations, services, status};
use crate::memo::MemoCache;
use crate::session::{RunState, Session, SessionId, SessionRegistry, SessionStore};

/// Script body executed on every rerun
pub type ScriptBody = dyn Fn(&mut ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync;

/// Widget change callback, run before the rerun it triggers
pub type Callback = dyn Fn(&SessionStore) -> anyhow::Result<()> + Send + Sync;

/// Handle to a registered app script and its callbacks
#[derive(Clone)]
pub struct ScriptHandle {
    name: Arc<str>,
    body: Arc<ScriptBody>,
    callbacks: Arc<HashMap<String, Arc<Callback>>>,
}

impl ScriptHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a named callback that widgets can reference via `on_change`
    pub fn with_callback<F>(mut self, name: &str, callback: F) -> Self
    where
        F: Fn(&SessionStore) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Arc::make_mut(&mut self.callbacks).insert(name.to_string(), Arc::new(callback));
        self
    }

    fn callback(&self, name: &str) -> Option<Arc<Callback>> {
        self.callbacks.get(name).cloned()
    }
}

/// Register the app script; called once per app
pub fn register_script<F>(name: &str, body: F) -> ScriptHandle
where
    F: Fn(&mut ScriptContext<'_>) -> anyhow::Result<()> + Send + Sync + 'static,
{
    ScriptHandle {
        name: Arc::from(name),
        body: Arc::new(body),
        callbacks: Arc::new(HashMap::new()),
    }
}

/// Inbound interaction from the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InteractionEvent {
    /// First render of a fresh view; creates the session if needed
    InitialView,
    /// A widget's value changed
    WidgetChanged {
        key: String,
        value: serde_json::Value,
    },
    /// Explicit rerun without a state change
    Rerun,
}

/// Kind of UI control backing a widget key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    /// Momentary: `true` only for the run its click triggered
    Button,
    Checkbox,
    Slider,
    TextInput,
    Selectbox,
}

/// Declaration of a widget inside a script run
#[derive(Debug, Clone)]
pub struct Widget {
    kind: WidgetKind,
    key: String,
    label: String,
    default: serde_json::Value,
    on_change: Option<String>,
}

impl Widget {
    pub fn new(kind: WidgetKind, key: &str, label: &str) -> Self {
        let default = match kind {
            WidgetKind::Button | WidgetKind::Checkbox => serde_json::Value::Bool(false),
            _ => serde_json::Value::Null,
        };
        Self {
            kind,
            key: key.to_string(),
            label: label.to_string(),
            default,
            on_change: None,
        }
    }

    pub fn button(key: &str, label: &str) -> Self {
        Self::new(WidgetKind::Button, key, label)
    }

    pub fn slider(key: &str, label: &str, default: i64) -> Self {
        Self::new(WidgetKind::Slider, key, label).with_default(default)
    }

    pub fn text_input(key: &str, label: &str) -> Self {
        Self::new(WidgetKind::TextInput, key, label).with_default("")
    }

    pub fn with_default(mut self, value: impl Into<serde_json::Value>) -> Self {
        self.default = value.into();
        self
    }

    /// Name of a callback registered on the script handle
    pub fn on_change(mut self, callback: &str) -> Self {
        self.on_change = Some(callback.to_string());
        self
    }
}

/// One element of the produced UI description
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "element", rename_all = "snake_case")]
pub enum UiElement {
    Text {
        body: String,
    },
    Json {
        value: serde_json::Value,
    },
    Widget {
        key: String,
        kind: WidgetKind,
        label: String,
        value: serde_json::Value,
    },
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Failed,
}

/// Result of a rerun, handed to the view layer
#[derive(Debug, Clone, Serialize)]
pub struct UiDescription {
    pub session_id: SessionId,
    /// Monotonic run number within the session
    pub run: u64,
    pub status: RunStatus,
    pub elements: Vec<UiElement>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<EncoreError>,
    /// Extra runs performed because the script requested a rerun
    pub reruns: u32,
}

impl UiDescription {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Text elements in order, mostly useful for assertions and the CLI
    pub fn texts(&self) -> Vec<&str> {
        self.elements
            .iter()
            .filter_map(|element| match element {
                UiElement::Text { body } => Some(body.as_str()),
                _ => None,
            })
            .collect()
    }
}

fn serialize_error<S: Serializer>(
    error: &Option<EncoreError>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(error) => serializer.serialize_some(&error.to_string()),
        None => serializer.serialize_none(),
    }
}

/// Per-session bookkeeping guarded by the session's run lock
#[derive(Debug, Default)]
pub(crate) struct RunSlot {
    run_count: u64,
    /// Widget key -> callback name, as declared by the last run
    callbacks: HashMap<String, String>,
    /// Button keys declared by the last run
    buttons: Vec<String>,
}

impl RunSlot {
    /// Remember what a run declared, unless it failed before declaring anything
    fn record(&mut self, outcome: &mut RunOutcome) {
        let declared_nothing = outcome.result.is_err()
            && outcome.callbacks.is_empty()
            && outcome.momentary.is_empty();
        if !declared_nothing {
            self.callbacks = std::mem::take(&mut outcome.callbacks);
            self.buttons = std::mem::take(&mut outcome.momentary);
        }
    }
}

/// Put every pressed button among `keys` back to `false`
fn release_buttons<'k>(
    session: &Session,
    keys: impl IntoIterator<Item = &'k String>,
) -> Result<()> {
    let store = session.store();
    for key in keys {
        if store.get(key)? == Some(serde_json::Value::Bool(true)) {
            store.set(key, &false)?;
        }
    }
    Ok(())
}

/// Execution context handed to the script body
pub struct ScriptContext<'a> {
    session: &'a Session,
    cache: &'a MemoCache,
    event: &'a InteractionEvent,
    run: u64,
    elements: Vec<UiElement>,
    callbacks: HashMap<String, String>,
    momentary: Vec<String>,
    rerun_requested: bool,
}

impl<'a> ScriptContext<'a> {
    pub fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    /// This session's state store
    pub fn state(&self) -> &SessionStore {
        self.session.store()
    }

    /// The process-wide memo cache
    pub fn cache(&self) -> &MemoCache {
        self.cache
    }

    /// The interaction that triggered this run
    pub fn event(&self) -> &InteractionEvent {
        self.event
    }

    pub fn run_number(&self) -> u64 {
        self.run
    }

    pub fn write(&mut self, text: impl Into<String>) {
        self.elements.push(UiElement::Text { body: text.into() });
    }

    pub fn json<T: Serialize + ?Sized>(&mut self, value: &T) -> anyhow::Result<()> {
        let value = serde_json::to_value(value)?;
        self.elements.push(UiElement::Json { value });
        Ok(())
    }

    /// Declare a widget and return its current value
    ///
    /// The value comes from the session store; a missing key is initialized
    /// with the widget's default.
    pub fn widget(&mut self, widget: Widget) -> Result<serde_json::Value> {
        let store = self.session.store();
        let value = match store.get(&widget.key)? {
            Some(value) => value,
            None => {
                store.set(&widget.key, &widget.default)?;
                widget.default.clone()
            }
        };

        if let Some(callback) = &widget.on_change {
            self.callbacks.insert(widget.key.clone(), callback.clone());
        }
        if widget.kind == WidgetKind::Button {
            self.momentary.push(widget.key.clone());
        }

        self.elements.push(UiElement::Widget {
            key: widget.key,
            kind: widget.kind,
            label: widget.label,
            value: value.clone(),
        });
        Ok(value)
    }

    /// `CopyOnRead` memoized call
    pub fn cache_data<T, F>(&self, function: &FunctionIdentity, args: &Args, compute: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let fingerprint = Fingerprint::compute(function, args)?;
        self.cache.get_or_compute_data(&fingerprint, compute)
    }

    /// `ShareOnRead` memoized call for resources shared across sessions
    pub fn cache_resource<T, F>(
        &self,
        function: &FunctionIdentity,
        args: &Args,
        compute: F,
    ) -> Result<Arc<T>>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> anyhow::Result<T>,
    {
        let fingerprint = Fingerprint::compute(function, args)?;
        self.cache.get_or_compute_shared(&fingerprint, compute)
    }

    /// Ask the driver to run the script again once this run completes
    pub fn request_rerun(&mut self) {
        self.rerun_requested = true;
    }
}

/// Everything a finished run hands back to the driver
struct RunOutcome {
    elements: Vec<UiElement>,
    callbacks: HashMap<String, String>,
    momentary: Vec<String>,
    rerun_requested: bool,
    result: anyhow::Result<()>,
}

/// Re-executes the registered script for sessions on every interaction
pub struct RerunDriver {
    script: ScriptHandle,
    registry: Arc<SessionRegistry>,
    cache: Arc<MemoCache>,
    max_consecutive_reruns: u32,
}

impl RerunDriver {
    pub fn new(
        script: ScriptHandle,
        registry: Arc<SessionRegistry>,
        cache: Arc<MemoCache>,
        max_consecutive_reruns: u32,
    ) -> Self {
        Self {
            script,
            registry,
            cache,
            max_consecutive_reruns,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &Arc<MemoCache> {
        &self.cache
    }

    /// Tear down a viewer's session
    pub fn disconnect(&self, session_id: &SessionId) -> Result<()> {
        self.registry.destroy(session_id)
    }

    /// Handle one interaction and rerun the script for that session
    ///
    /// Script failures are reported inside the returned description; `Err`
    /// is reserved for session-level problems (unknown, destroyed, limit).
    pub async fn trigger_rerun(
        &self,
        session_id: &SessionId,
        event: InteractionEvent,
    ) -> Result<UiDescription> {
        let session = match event {
            InteractionEvent::InitialView => self.registry.get_or_create(session_id)?,
            _ => self.registry.get(session_id)?,
        };

        // Serializes runs of this session; later triggers queue here.
        let mut slot = session.run_slot.lock().await;
        if session.is_destroyed() {
            return Err(EncoreError::Canceled(session_id.clone()));
        }

        if let InteractionEvent::WidgetChanged { key, value } = &event {
            session.store().set(key, value)?;
            debug!(
                service = services::RERUN,
                operation = operations::WIDGET_CHANGE,
                session_id = %session_id,
                key = %key,
                "committed widget value"
            );

            if let Some(failure) = self.run_callback(&session, &slot, key) {
                release_buttons(&session, &slot.buttons)?;
                slot.run_count += 1;
                return Ok(UiDescription {
                    session_id: session_id.clone(),
                    run: slot.run_count,
                    status: RunStatus::Failed,
                    elements: Vec::new(),
                    error: Some(failure),
                    reruns: 0,
                });
            }
        }

        let mut event = event;
        let mut reruns = 0;

        loop {
            slot.run_count += 1;
            let run = slot.run_count;
            let started = Instant::now();

            session.transition(RunState::Running);
            let mut outcome = self.execute(&session, &event, run).await;
            let state = session.transition(RunState::Idle);

            if state == RunState::Destroyed {
                warn!(
                    service = services::RERUN,
                    operation = operations::RUN,
                    status = status::CANCELED,
                    session_id = %session_id,
                    run,
                    "session destroyed during rerun"
                );
                return Err(EncoreError::Canceled(session_id.clone()));
            }

            release_buttons(&session, slot.buttons.iter().chain(&outcome.momentary))?;
            slot.record(&mut outcome);

            match outcome.result {
                Ok(()) => {
                    info!(
                        service = services::RERUN,
                        operation = operations::RUN,
                        status = status::SUCCESS,
                        session_id = %session_id,
                        run,
                        duration_ms = started.elapsed().as_millis() as u64,
                        "rerun completed"
                    );

                    if outcome.rerun_requested && reruns < self.max_consecutive_reruns {
                        reruns += 1;
                        event = InteractionEvent::Rerun;
                        continue;
                    }
                    if outcome.rerun_requested {
                        warn!(
                            session_id = %session_id,
                            reruns,
                            "rerun requested past the consecutive rerun limit, ignoring"
                        );
                    }

                    return Ok(UiDescription {
                        session_id: session_id.clone(),
                        run,
                        status: RunStatus::Completed,
                        elements: outcome.elements,
                        error: None,
                        reruns,
                    });
                }
                Err(e) => {
                    let error = EncoreError::ScriptExecution {
                        session_id: session_id.clone(),
                        message: format!("{:#}", e),
                    };
                    warn!(
                        service = services::RERUN,
                        operation = operations::RUN,
                        status = status::ERROR,
                        session_id = %session_id,
                        run,
                        error = %error,
                        "rerun failed"
                    );

                    return Ok(UiDescription {
                        session_id: session_id.clone(),
                        run,
                        status: RunStatus::Failed,
                        elements: outcome.elements,
                        error: Some(error),
                        reruns,
                    });
                }
            }
        }
    }

    /// Run the callback bound to `key`, returning the failure if it failed
    fn run_callback(&self, session: &Session, slot: &RunSlot, key: &str) -> Option<EncoreError> {
        let name = slot.callbacks.get(key)?;
        let Some(callback) = self.script.callback(name) else {
            warn!(callback = %name, key, "widget references an unregistered callback");
            return None;
        };

        debug!(callback = %name, key, "running widget callback");
        callback(session.store()).err().map(|e| EncoreError::ScriptExecution {
            session_id: session.id().clone(),
            message: format!("callback `{}` failed: {:#}", name, e),
        })
    }

    /// Execute the script body once on the blocking pool
    async fn execute(&self, session: &Arc<Session>, event: &InteractionEvent, run: u64) -> RunOutcome {
        let script = self.script.clone();
        let session = Arc::clone(session);
        let cache = Arc::clone(&self.cache);
        let event = event.clone();

        let joined = tokio::task::spawn_blocking(move || {
            let mut ctx = ScriptContext {
                session: &session,
                cache: &cache,
                event: &event,
                run,
                elements: Vec::new(),
                callbacks: HashMap::new(),
                momentary: Vec::new(),
                rerun_requested: false,
            };
            let result = (script.body)(&mut ctx);

            RunOutcome {
                elements: ctx.elements,
                callbacks: ctx.callbacks,
                momentary: ctx.momentary,
                rerun_requested: ctx.rerun_requested,
                result,
            }
        })
        .await;

        joined.unwrap_or_else(|e| RunOutcome {
            elements: Vec::new(),
            callbacks: HashMap::new(),
            momentary: Vec::new(),
            rerun_requested: false,
            result: Err(anyhow::anyhow!("script panicked: {}", e)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn driver(script: ScriptHandle) -> RerunDriver {
        RerunDriver::new(
            script,
            Arc::new(SessionRegistry::default()),
            Arc::new(MemoCache::unbounded()),
            3,
        )
    }

    fn counter_script() -> ScriptHandle {
        register_script("counter", |ctx| {
            let count: u64 = ctx.state().get_or_insert_with("count", || 0)?;
            let clicked = ctx.widget(Widget::button("increment", "Increment"))?;
            let count = if clicked == serde_json::Value::Bool(true) {
                ctx.state().set("count", &(count + 1))?;
                count + 1
            } else {
                count
            };
            ctx.write(format!("Count = {}", count));
            Ok(())
        })
    }

    fn click(key: &str) -> InteractionEvent {
        InteractionEvent::WidgetChanged {
            key: key.to_string(),
            value: serde_json::Value::Bool(true),
        }
    }

    #[tokio::test]
    async fn test_state_persists_across_reruns() {
        let driver = driver(counter_script());
        let id = SessionId::from("viewer");

        let first = driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();
        assert_eq!(first.texts(), vec!["Count = 0"]);
        assert_eq!(first.run, 1);

        driver.trigger_rerun(&id, click("increment")).await.unwrap();
        let third = driver.trigger_rerun(&id, click("increment")).await.unwrap();
        assert_eq!(third.texts(), vec!["Count = 2"]);

        // Buttons reset after the run they triggered
        let plain = driver.trigger_rerun(&id, InteractionEvent::Rerun).await.unwrap();
        assert_eq!(plain.texts(), vec!["Count = 2"]);
        assert_eq!(plain.run, 4);
    }

    #[tokio::test]
    async fn test_unknown_session_requires_initial_view() {
        let driver = driver(counter_script());
        let err = driver
            .trigger_rerun(&SessionId::from("nobody"), InteractionEvent::Rerun)
            .await
            .unwrap_err();
        assert!(matches!(err, EncoreError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn test_script_failure_keeps_prior_mutations() {
        let script = register_script("fails", |ctx| {
            ctx.state().set("before", &true)?;
            ctx.write("partial");
            anyhow::bail!("division by zero")
        });
        let driver = driver(script);
        let id = SessionId::from("viewer");

        let description = driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();

        assert_eq!(description.status, RunStatus::Failed);
        assert_eq!(description.texts(), vec!["partial"]);
        match description.error {
            Some(EncoreError::ScriptExecution { message, .. }) => {
                assert!(message.contains("division by zero"))
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let session = driver.registry().get(&id).unwrap();
        assert_eq!(session.store().get_as::<bool>("before").unwrap(), Some(true));
        assert_eq!(session.run_state(), RunState::Idle);
    }

    #[tokio::test]
    async fn test_script_panic_is_reported() {
        let script = register_script("panics", |_ctx| panic!("unexpected"));
        let driver = driver(script);

        let description = driver
            .trigger_rerun(&SessionId::from("p"), InteractionEvent::InitialView)
            .await
            .unwrap();
        assert_eq!(description.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_callback_runs_before_rerun() {
        let script = register_script("callbacks", |ctx| {
            ctx.widget(Widget::text_input("name", "Name").on_change("greet"))?;
            let greeting: Option<String> = ctx.state().get_as("greeting")?;
            ctx.write(greeting.unwrap_or_default());
            Ok(())
        })
        .with_callback("greet", |store| {
            let name: String = store.get_as("name")?.unwrap_or_default();
            store.set("greeting", &format!("Hello, {}!", name))?;
            Ok(())
        });
        let driver = driver(script);
        let id = SessionId::from("viewer");

        driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();
        let description = driver
            .trigger_rerun(
                &id,
                InteractionEvent::WidgetChanged {
                    key: "name".to_string(),
                    value: serde_json::json!("Ada"),
                },
            )
            .await
            .unwrap();

        assert_eq!(description.texts(), vec!["Hello, Ada!"]);
    }

    #[tokio::test]
    async fn test_failing_callback_surfaces_error() {
        let script = register_script("callbacks", |ctx| {
            ctx.widget(Widget::slider("level", "Level", 1).on_change("check"))?;
            Ok(())
        })
        .with_callback("check", |_store| anyhow::bail!("level out of range"));
        let driver = driver(script);
        let id = SessionId::from("viewer");

        driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();
        let description = driver
            .trigger_rerun(
                &id,
                InteractionEvent::WidgetChanged {
                    key: "level".to_string(),
                    value: serde_json::json!(99),
                },
            )
            .await
            .unwrap();

        assert_eq!(description.status, RunStatus::Failed);
        assert!(description
            .error
            .unwrap()
            .to_string()
            .contains("level out of range"));
    }

    #[tokio::test]
    async fn test_button_released_when_its_callback_fails() {
        let script = register_script("audited", |ctx| {
            let clicked = ctx.widget(Widget::button("increment", "Increment").on_change("audit"))?;
            let count: u64 = ctx.state().get_or_insert_with("count", || 0)?;
            let count = if clicked == serde_json::Value::Bool(true) {
                ctx.state().set("count", &(count + 1))?;
                count + 1
            } else {
                count
            };
            ctx.write(format!("Count = {}", count));
            Ok(())
        })
        .with_callback("audit", |_store| anyhow::bail!("audit log unavailable"));
        let driver = driver(script);
        let id = SessionId::from("viewer");

        driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();
        let failed = driver.trigger_rerun(&id, click("increment")).await.unwrap();
        assert_eq!(failed.status, RunStatus::Failed);

        let next = driver.trigger_rerun(&id, InteractionEvent::Rerun).await.unwrap();
        assert_eq!(next.status, RunStatus::Completed);
        assert_eq!(next.texts(), vec!["Count = 0"]);
    }

    #[tokio::test]
    async fn test_button_released_when_run_panics() {
        let panicked = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&panicked);
        let script = register_script("flaky", move |ctx| {
            let clicked = ctx.widget(Widget::button("increment", "Increment"))?;
            if clicked == serde_json::Value::Bool(true) && !flag.swap(true, Ordering::SeqCst) {
                panic!("renderer crashed");
            }
            let count: u64 = ctx.state().get_or_insert_with("count", || 0)?;
            let count = if clicked == serde_json::Value::Bool(true) {
                ctx.state().set("count", &(count + 1))?;
                count + 1
            } else {
                count
            };
            ctx.write(format!("Count = {}", count));
            Ok(())
        });
        let driver = driver(script);
        let id = SessionId::from("viewer");

        driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();
        let crashed = driver.trigger_rerun(&id, click("increment")).await.unwrap();
        assert_eq!(crashed.status, RunStatus::Failed);
        assert!(panicked.load(Ordering::SeqCst));

        let next = driver.trigger_rerun(&id, InteractionEvent::Rerun).await.unwrap();
        assert_eq!(next.texts(), vec!["Count = 0"]);

        // Buttons declared before the crash still work afterwards
        let clicked = driver.trigger_rerun(&id, click("increment")).await.unwrap();
        assert_eq!(clicked.texts(), vec!["Count = 1"]);
    }

    #[tokio::test]
    async fn test_request_rerun_is_bounded() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&runs);
        let script = register_script("loops", move |ctx| {
            counted.fetch_add(1, Ordering::SeqCst);
            ctx.request_rerun();
            Ok(())
        });
        let driver = driver(script);

        let description = driver
            .trigger_rerun(&SessionId::from("loop"), InteractionEvent::InitialView)
            .await
            .unwrap();

        assert_eq!(description.reruns, 3);
        assert_eq!(runs.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_destroy_cancels_in_flight_run() {
        let script = register_script("slow", |ctx| {
            for i in 0..200u32 {
                ctx.state().set("progress", &i)?;
                std::thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });
        let driver = Arc::new(driver(script));
        let id = SessionId::from("leaving");

        let running = {
            let driver = Arc::clone(&driver);
            let id = id.clone();
            tokio::spawn(async move { driver.trigger_rerun(&id, InteractionEvent::InitialView).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        driver.disconnect(&id).unwrap();

        let result = running.await.unwrap();
        assert!(matches!(result, Err(EncoreError::Canceled(_))));
        assert!(!driver.registry().contains(&id));
    }

    #[tokio::test]
    async fn test_reruns_of_one_session_are_serialized() {
        let active = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));
        let (a, o) = (Arc::clone(&active), Arc::clone(&overlap));
        let script = register_script("serial", move |_ctx| {
            if a.fetch_add(1, Ordering::SeqCst) > 0 {
                o.fetch_add(1, Ordering::SeqCst);
            }
            std::thread::sleep(Duration::from_millis(10));
            a.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        });
        let driver = Arc::new(driver(script));
        let id = SessionId::from("busy");
        driver
            .trigger_rerun(&id, InteractionEvent::InitialView)
            .await
            .unwrap();

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let driver = Arc::clone(&driver);
                let id = id.clone();
                tokio::spawn(async move { driver.trigger_rerun(&id, InteractionEvent::Rerun).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_data_helper_shares_across_sessions() {
        let computations = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&computations);
        let script = register_script("cached", move |ctx| {
            let identity = FunctionIdentity::versioned("expensive", "1");
            let counted = Arc::clone(&counted);
            let total: u64 = ctx.cache_data(&identity, &Args::new().arg(&10u64)?, move || {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok((1..=10u64).sum())
            })?;
            ctx.write(total.to_string());
            Ok(())
        });
        let driver = driver(script);

        for name in ["a", "b", "c"] {
            let description = driver
                .trigger_rerun(&SessionId::from(name), InteractionEvent::InitialView)
                .await
                .unwrap();
            assert_eq!(description.texts(), vec!["55"]);
        }
        assert_eq!(computations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_serialization() {
        let event: InteractionEvent =
            serde_json::from_str(r#"{"type":"widget_changed","key":"x","value":3}"#).unwrap();
        assert_eq!(
            event,
            InteractionEvent::WidgetChanged {
                key: "x".to_string(),
                value: serde_json::json!(3)
            }
        );
    }
}
