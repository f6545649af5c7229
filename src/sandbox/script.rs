//! JavaScript engine backed by an embedded QuickJS interpreter.
//!
//! Every launch builds a brand-new runtime and context on a blocking thread.
//! Load order inside the context is fixed: simulated platform, capability
//! overrides, then the user's code wrapped in an async function whose
//! rejection is captured. The only way out of the context is the
//! `__hostPost` function, which forwards raw JSON strings to the host. It is
//! removed, along with the `__shield` helpers, before user code runs.
//!
//! Teardown raises a flag that the interpreter polls from its interrupt
//! handler, so even a tight synchronous loop stops and the thread exits.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rquickjs::{CatchResultExt, Context, Ctx, Function, Object, Persistent, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::engine::{IsolatedContext, LaunchRequest, LiveEngine};
use super::message::{ContextMessage, RelayedLine};
use crate::error::RunFault;

const PLATFORM: &str = include_str!("platform.js");

/// Removes the host bridge and the override helpers from the global scope.
/// Override fragments keep their own references to both.
const SEAL: &str = "delete globalThis.__hostPost; delete globalThis.__shield;";

/// Interpreter limits applied to every context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    /// Heap ceiling in bytes.
    pub memory_limit: usize,
    /// Interpreter stack ceiling in bytes.
    pub max_stack_size: usize,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            memory_limit: 64 * 1024 * 1024,
            max_stack_size: 512 * 1024,
        }
    }
}

pub struct ScriptEngine {
    limits: ScriptLimits,
    live: Arc<AtomicUsize>,
}

impl ScriptEngine {
    pub fn new(limits: ScriptLimits) -> Self {
        Self {
            limits,
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Contexts whose interpreter thread has not exited yet.
    pub fn live_contexts(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

/// Counts one interpreter thread for as long as it is alive.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl LiveEngine for ScriptEngine {
    fn language(&self) -> &str {
        "javascript"
    }

    fn label(&self) -> &str {
        "JavaScript"
    }

    fn accepts_overrides(&self) -> bool {
        true
    }

    async fn launch(&self, request: LaunchRequest) -> Result<IsolatedContext, RunFault> {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let limits = self.limits;
        let guard = LiveGuard::enter(&self.live);

        let flag = cancelled.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            run_context(request, limits, tx, flag);
        });

        Ok(IsolatedContext::new(rx, move || {
            cancelled.store(true, Ordering::SeqCst);
        }))
    }
}

/// Renders a failed interpreter call, pulling the pending exception out of
/// the context when there is one.
fn caught<T>(ctx: &Ctx<'_>, result: rquickjs::Result<T>) -> Result<T, String> {
    result.catch(ctx).map_err(|e| e.to_string())
}

/// Functions of the platform's runtime object, resolved once after the
/// platform script ran so user code cannot swap them out.
struct Hooks {
    run: Persistent<Function<'static>>,
    tick: Persistent<Function<'static>>,
    fault: Persistent<Function<'static>>,
    complete: Persistent<Function<'static>>,
}

impl Hooks {
    fn resolve<'js>(runtime: Object<'js>, ctx: &Ctx<'js>) -> rquickjs::Result<Self> {
        let hook = |name: &str| -> rquickjs::Result<Persistent<Function<'static>>> {
            let function: Function = runtime.get(name)?;
            Ok(Persistent::save(ctx, function))
        };
        Ok(Self {
            run: hook("run")?,
            tick: hook("tick")?,
            fault: hook("fault")?,
            complete: hook("complete")?,
        })
    }

    fn run(&self, context: &Context, source: String) -> Result<(), String> {
        context.with(|ctx| {
            let result = self
                .run
                .clone()
                .restore(&ctx)
                .and_then(|f| f.call::<_, ()>((source,)));
            caught(&ctx, result)
        })
    }

    /// Fires the earliest timer. `false` once none remain.
    fn tick(&self, context: &Context) -> Result<bool, String> {
        context.with(|ctx| {
            let result = self
                .tick
                .clone()
                .restore(&ctx)
                .and_then(|f| f.call::<_, bool>(()));
            caught(&ctx, result)
        })
    }

    fn fault(&self, context: &Context, message: String) -> Result<(), String> {
        context.with(|ctx| {
            let result = self
                .fault
                .clone()
                .restore(&ctx)
                .and_then(|f| f.call::<_, ()>((message,)));
            caught(&ctx, result)
        })
    }

    fn complete(&self, context: &Context) -> Result<(), String> {
        context.with(|ctx| {
            let result = self
                .complete
                .clone()
                .restore(&ctx)
                .and_then(|f| f.call::<_, ()>(()));
            caught(&ctx, result)
        })
    }
}

fn run_context(
    request: LaunchRequest,
    limits: ScriptLimits,
    tx: mpsc::UnboundedSender<String>,
    cancelled: Arc<AtomicBool>,
) {
    match execute(request, limits, tx.clone(), &cancelled) {
        Ok(()) => {}
        Err(e) if cancelled.load(Ordering::SeqCst) => {
            debug!("Script context interrupted: {e}");
        }
        Err(e) => {
            // The platform itself failed: report a failed completion directly.
            warn!("Script context failed before completion: {e}");
            let message = ContextMessage::RunComplete {
                output_lines: vec![RelayedLine::err(format!("Uncaught {e}"))],
                elapsed_ms: 0.0,
            };
            let _ = tx.send(message.to_json());
        }
    }
    debug!("Script context released");
}

fn execute(
    request: LaunchRequest,
    limits: ScriptLimits,
    tx: mpsc::UnboundedSender<String>,
    cancelled: &Arc<AtomicBool>,
) -> Result<(), String> {
    let runtime = Runtime::new().map_err(|e| e.to_string())?;
    runtime.set_memory_limit(limits.memory_limit);
    runtime.set_max_stack_size(limits.max_stack_size);
    let flag = cancelled.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || flag.load(Ordering::SeqCst))));
    let context = Context::full(&runtime).map_err(|e| e.to_string())?;

    let gate = cancelled.clone();
    let hooks = context.with(|ctx| -> Result<Hooks, String> {
        let bridge = Function::new(ctx.clone(), move |raw: String| {
            // A closed channel means the host stopped listening.
            if !gate.load(Ordering::SeqCst) {
                let _ = tx.send(raw);
            }
        })
        .and_then(|f| ctx.globals().set("__hostPost", f));
        caught(&ctx, bridge)?;

        let platform = caught(&ctx, ctx.eval::<Object, _>(PLATFORM))?;
        caught(&ctx, Hooks::resolve(platform, &ctx))
    })?;

    let installed = match request.overrides.as_deref() {
        Some(overrides) => context.with(|ctx| caught(&ctx, ctx.eval::<(), _>(overrides))),
        None => Ok(()),
    };
    // Interceptions can only originate from the overrides installed above.
    context.with(|ctx| caught(&ctx, ctx.eval::<(), _>(SEAL)))?;

    if let Err(e) = installed {
        // User code never runs without its overrides.
        warn!("Script context: capability overrides failed to load: {e}");
        hooks.fault(&context, format!("capability overrides failed to load: {e}"))?;
        return hooks.complete(&context);
    }

    if let Err(e) = hooks.run(&context, request.source) {
        if cancelled.load(Ordering::SeqCst) {
            return Err(e);
        }
        hooks.fault(&context, e)?;
    }

    loop {
        if cancelled.load(Ordering::SeqCst) {
            debug!("Script context cancelled");
            return Ok(());
        }
        drain_jobs(&runtime, cancelled);
        match hooks.tick(&context) {
            Ok(true) => continue,
            Ok(false) => break,
            Err(e) if cancelled.load(Ordering::SeqCst) => return Err(e),
            Err(e) => {
                hooks.fault(&context, e)?;
                drain_jobs(&runtime, cancelled);
                break;
            }
        }
    }

    if cancelled.load(Ordering::SeqCst) {
        return Ok(());
    }
    hooks.complete(&context)
}

/// Runs queued promise jobs until the queue is empty or the context is
/// cancelled.
fn drain_jobs(runtime: &Runtime, cancelled: &AtomicBool) {
    while !cancelled.load(Ordering::SeqCst) {
        match runtime.execute_pending_job() {
            Ok(true) => {}
            Ok(false) => break,
            Err(_) => debug!("Script context: a promise job raised"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::capability::{catalog, CapabilityDescriptor};
    use crate::inject::{self, strategy::js_string};
    use crate::policy::{PolicyStatus, PolicyStore};
    use crate::sandbox::message::RelayedKind;

    async fn run(source: &str, overrides: Option<String>) -> (Vec<String>, Vec<RelayedLine>) {
        let engine = ScriptEngine::new(ScriptLimits::default());
        let mut context = engine
            .launch(LaunchRequest {
                source: source.to_string(),
                overrides,
            })
            .await
            .unwrap();

        let mut intercepts = Vec::new();
        while let Some(raw) = context.recv().await {
            match ContextMessage::parse(&raw) {
                Some(ContextMessage::CapabilityIntercept { capability_id, .. }) => {
                    intercepts.push(capability_id)
                }
                Some(ContextMessage::RunComplete { output_lines, .. }) => {
                    return (intercepts, output_lines)
                }
                None => {}
            }
        }
        panic!("context closed without completing");
    }

    fn overrides(configure: impl FnOnce(&mut PolicyStore)) -> Option<String> {
        let mut store = PolicyStore::new(Arc::new(catalog::browser_shield()));
        configure(&mut store);
        Some(inject::synthesize(&store).source)
    }

    fn texts(lines: &[RelayedLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[tokio::test]
    async fn test_console_capture_and_kinds() {
        let (_, lines) = run(
            "console.log('hello', 42, {a: 1}); console.warn('careful'); console.error('bad');",
            None,
        )
        .await;
        assert_eq!(lines[0].text, "hello 42 {\n  \"a\": 1\n}");
        assert_eq!(lines[1].kind, RelayedKind::Warn);
        assert_eq!(lines[2].kind, RelayedKind::Err);
    }

    #[tokio::test]
    async fn test_uncaught_error_is_captured() {
        let (_, lines) = run("console.log('before'); throw new Error('boom');", None).await;
        assert_eq!(texts(&lines), vec!["before", "Uncaught Error: boom"]);
    }

    #[tokio::test]
    async fn test_syntax_error_is_captured() {
        let (_, lines) = run("let = ;", None).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.starts_with("Uncaught "));
    }

    #[tokio::test]
    async fn test_timers_run_on_virtual_clock() {
        let source = r#"
            const delay = ms => new Promise(r => setTimeout(r, ms));
            setTimeout(() => console.log('late'), 5000);
            await delay(100);
            console.log('early');
        "#;
        let (_, lines) = run(source, None).await;
        assert_eq!(texts(&lines), vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_blocked_geolocation_is_denied_and_reported() {
        let source = r#"
            navigator.geolocation.getCurrentPosition(
                pos => console.log('Location:', pos.coords.latitude, pos.coords.longitude),
                err => console.error(err.message)
            );
        "#;
        let (intercepts, lines) = run(source, overrides(|_| {})).await;
        assert_eq!(intercepts, vec!["geolocation"]);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, RelayedKind::Err);
        assert_eq!(lines[0].text, inject::DENIAL_MESSAGE);
    }

    #[tokio::test]
    async fn test_allowed_geolocation_reaches_platform() {
        let source = r#"
            navigator.geolocation.getCurrentPosition(
                pos => console.log('Location:', pos.coords.latitude, pos.coords.longitude),
                err => console.error(err.message)
            );
        "#;
        let (intercepts, lines) =
            run(source, overrides(|s| s.set_all(PolicyStatus::Allowed))).await;
        assert!(intercepts.is_empty());
        assert_eq!(texts(&lines), vec!["Location: 48.8566 2.3522"]);
    }

    #[tokio::test]
    async fn test_overrides_are_idempotent() {
        let once = overrides(|_| {}).unwrap();
        let twice = format!("{once}\n{once}");
        let source = r#"
            navigator.geolocation.getCurrentPosition(() => {}, () => {});
            console.log(navigator.sendBeacon('/collect', 'x'));
            console.log(JSON.stringify(document.createElement('canvas').toDataURL()));
        "#;
        let (intercepts, lines) = run(source, Some(twice)).await;
        assert_eq!(intercepts, vec!["geolocation", "sendBeacon", "canvasFingerprint"]);
        assert_eq!(texts(&lines), vec!["false", "\"\""]);
    }

    #[tokio::test]
    async fn test_value_spoof_and_filters() {
        let source = r#"
            console.log(navigator.hardwareConcurrency, navigator.plugins.length);
            const gl = document.createElement('canvas').getContext('webgl');
            console.log(gl.getParameter(37446) === '', gl.getParameter(1) === null);
        "#;
        let (intercepts, lines) = run(source, overrides(|_| {})).await;
        assert_eq!(texts(&lines), vec!["4 0", "true true"]);
        assert_eq!(
            intercepts,
            vec!["hardwareConcurrency", "plugins", "webglFingerprint"]
        );
    }

    #[tokio::test]
    async fn test_monitor_passes_through_and_reports() {
        let source = r#"
            console.log(document.cookie);
            console.log(screen.colorDepth);
        "#;
        let (intercepts, lines) = run(source, overrides(|_| {})).await;
        assert_eq!(texts(&lines), vec!["session=sandbox", "30"]);
        assert_eq!(intercepts, vec!["cookieAccess", "screenDetails"]);
    }

    #[tokio::test]
    async fn test_generic_noop_for_unmapped_capability() {
        let source = "console.log(typeof crypto.subtle);";
        let (intercepts, lines) = run(
            source,
            overrides(|s| s.set("SubtleCrypto", PolicyStatus::Blocked).unwrap()),
        )
        .await;
        assert_eq!(texts(&lines), vec!["undefined"]);
        assert_eq!(intercepts, vec!["SubtleCrypto"]);
    }

    #[tokio::test]
    async fn test_user_code_cannot_forge_intercepts() {
        let source = r#"
            console.log(typeof __hostPost, typeof __shield);
            try { __shield.intercept('usb'); } catch (e) { console.log('no bridge'); }
            try { globalThis['__shield'].intercept('geolocation'); } catch (e) { console.log('no bridge'); }
        "#;
        let (intercepts, lines) = run(source, overrides(|s| s.set_all(PolicyStatus::Allowed))).await;
        assert!(intercepts.is_empty());
        assert_eq!(texts(&lines), vec!["undefined undefined", "no bridge", "no bridge"]);
    }

    #[tokio::test]
    async fn test_failed_overrides_refuse_to_run_user_code() {
        let broken = Some("throw new Error('broken override');".to_string());
        let (intercepts, lines) = run("console.log('ran');", broken).await;
        assert!(intercepts.is_empty());
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, RelayedKind::Err);
        assert!(lines[0]
            .text
            .starts_with("Uncaught capability overrides failed to load"));
    }

    #[tokio::test]
    async fn test_runaway_recursion_is_an_uncaught_error() {
        let (_, lines) = run("function f() { return f(); }\nf();", None).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].text.starts_with("Uncaught "));
    }

    /// Touches a capability's entry point once: calls it when it is a
    /// function, calls its first method when it is an object, and otherwise
    /// just reads it.
    fn touch(descriptor: &CapabilityDescriptor) -> String {
        let args = match descriptor.id {
            "webglFingerprint" => "[37446]",
            _ => "[]",
        };
        format!(
            r#"
            var parts = {path}.split('.');
            var owner = globalThis;
            for (var i = 0; i < parts.length - 1; i++) owner = owner[parts[i]];
            var value = owner[parts[parts.length - 1]];
            try {{
                if (typeof value === 'function') {{
                    value.apply(owner, {args});
                }} else if (value !== null && typeof value === 'object') {{
                    var method = Object.keys(value).find(function (k) {{ return typeof value[k] === 'function'; }});
                    if (method) value[method]();
                }}
            }} catch (e) {{}}
            "#,
            path = js_string(descriptor.entry_point),
        )
    }

    #[tokio::test]
    async fn test_every_blocked_capability_intercepts_exactly_once() {
        let blocked = overrides(|s| s.set_all(PolicyStatus::Blocked));
        for descriptor in catalog::BROWSER_SHIELD {
            let (intercepts, _) = run(&touch(descriptor), blocked.clone()).await;
            assert_eq!(
                intercepts,
                vec![descriptor.id.to_string()],
                "entry point {}",
                descriptor.entry_point
            );
        }
    }

    #[tokio::test]
    async fn test_teardown_stops_endless_interval() {
        let engine = ScriptEngine::new(ScriptLimits::default());
        let mut context = engine
            .launch(LaunchRequest {
                source: "setInterval(() => {}, 10);".to_string(),
                overrides: None,
            })
            .await
            .unwrap();
        let early = tokio::time::timeout(Duration::from_millis(200), context.recv()).await;
        assert!(early.is_err(), "an endless interval must not complete");
        drop(context);
        assert!(released(&engine).await);
    }

    #[tokio::test]
    async fn test_teardown_interrupts_busy_loop() {
        let engine = ScriptEngine::new(ScriptLimits::default());
        let context = engine
            .launch(LaunchRequest {
                source: "while (true) { for (let i = 0; i < 10; i++) {} }".to_string(),
                overrides: None,
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(engine.live_contexts(), 1);

        drop(context);
        assert!(released(&engine).await, "interpreter thread outlived its context");
    }

    async fn released(engine: &ScriptEngine) -> bool {
        tokio::time::timeout(Duration::from_secs(5), async {
            while engine.live_contexts() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }
}
