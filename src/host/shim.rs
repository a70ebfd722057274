//! Instrumentation shim: the JavaScript prelude installed in the guest
//! context before any user code runs, plus the host-side harvest protocol.
//!
//! The shim wraps the diagnostic entry points (`console.log` / `warn` /
//! `error` / `info`), installs `globalThis.onerror` and
//! `globalThis.onunhandledrejection` hooks, and provides the guarded
//! execution entry the assembler targets. Every captured event is pushed
//! onto a guest-side outbox array as a plain JSON object; the host drains
//! the outbox after each evaluation slice and forwards the messages across
//! the isolation boundary. Events are appended in the exact order the
//! underlying calls occur, so FIFO draining preserves emission order.
//!
//! `setTimeout` / `clearTimeout` are part of the shim surface: callbacks
//! stay in a guest-side registry while the delay requests travel to the
//! host, which keeps the deadline queue and calls back into the guest when
//! a timer comes due.

/// Guest prelude source. Idempotent: re-evaluating it (the assembler also
/// embeds it as a script element, per the document contract) is a no-op,
/// which keeps timer and outbox state intact across the duplicate install.
pub const SHIM_SOURCE: &str = r#"(function () {
    "use strict";
    if (globalThis.__lp_outbox) { return; }

    var outbox = [];
    globalThis.__lp_outbox = outbox;

    function format(value) {
        try {
            if (typeof value === "object" && value !== null) {
                var text = JSON.stringify(value, null, 2);
                return text === undefined ? String(value) : text;
            }
            return String(value);
        } catch (err) {
            return String(value);
        }
    }
    globalThis.__lp_format = format;

    function emit(method, values) {
        var args = [];
        for (var i = 0; i < values.length; i++) {
            args.push(format(values[i]));
        }
        outbox.push({ type: "console", method: method, args: args, at: Date.now() });
    }

    var console = {};
    ["log", "warn", "error", "info"].forEach(function (method) {
        console[method] = function () {
            emit(method, Array.prototype.slice.call(arguments));
        };
    });
    globalThis.console = console;

    globalThis.onerror = function (message) {
        emit("error", [message]);
    };
    globalThis.onunhandledrejection = function (reason) {
        emit("error", ["Uncaught (in promise) " + format(reason)]);
    };

    globalThis.__lp_reportError = function (err) {
        var message;
        if (err instanceof Error) {
            message = "Uncaught " + err.name + ": " + err.message;
            if (err.stack) {
                message = message + "\n" + err.stack;
            }
        } else {
            message = "Uncaught " + format(err);
        }
        if (typeof globalThis.onerror === "function") {
            globalThis.onerror(message);
        }
    };

    globalThis.__lp_run = function (source) {
        try {
            (0, eval)(source);
        } catch (err) {
            globalThis.__lp_reportError(err);
        }
    };

    var timerSeq = 1;
    var timerCallbacks = {};
    var timerRequests = [];
    globalThis.__lp_timer_requests = timerRequests;

    globalThis.setTimeout = function (callback, delay) {
        var id = timerSeq;
        timerSeq = timerSeq + 1;
        timerCallbacks[id] = typeof callback === "function" ? callback : null;
        timerRequests.push({
            id: id,
            delay: typeof delay === "number" && delay > 0 ? delay : 0
        });
        return id;
    };
    globalThis.clearTimeout = function (id) {
        delete timerCallbacks[id];
    };
    globalThis.__lp_fireTimer = function (id) {
        var callback = timerCallbacks[id];
        delete timerCallbacks[id];
        if (typeof callback === "function") {
            try {
                callback();
            } catch (err) {
                globalThis.__lp_reportError(err);
            }
        }
    };

    // Best-effort rejection tracking: promises created through the global
    // constructor or Promise.reject report through onunhandledrejection
    // unless a rejection handler was attached. Engine-internal promise
    // creation bypasses the global binding and is not tracked.
    var NativePromise = globalThis.Promise;
    if (typeof NativePromise === "function") {
        var origThen = NativePromise.prototype.then;
        NativePromise.prototype.then = function (onFulfilled, onRejected) {
            if (typeof onRejected === "function") {
                this.__lp_handled = true;
            }
            return origThen.call(this, onFulfilled, onRejected);
        };

        var track = function (promise) {
            origThen.call(promise, undefined, function (reason) {
                if (!promise.__lp_handled) {
                    if (typeof globalThis.onunhandledrejection === "function") {
                        globalThis.onunhandledrejection(reason);
                    }
                }
            });
            return promise;
        };

        var TrackedPromise = function (executor) {
            return track(new NativePromise(executor));
        };
        TrackedPromise.prototype = NativePromise.prototype;
        TrackedPromise.resolve = function (value) {
            return NativePromise.resolve(value);
        };
        TrackedPromise.reject = function (reason) {
            return track(NativePromise.reject(reason));
        };
        ["all", "allSettled", "any", "race"].forEach(function (name) {
            if (typeof NativePromise[name] === "function") {
                TrackedPromise[name] = NativePromise[name].bind(NativePromise);
            }
        });
        globalThis.Promise = TrackedPromise;
    }
})();
"#;

/// Expression the host evaluates after each slice to pull pending console
/// messages and timer registrations out of the guest in one hop. Always
/// yields a JSON string, even when the shim failed to install.
pub const HARVEST_SOURCE: &str = r#"(function () {
    var state = { messages: [], timers: [] };
    if (globalThis.__lp_outbox) {
        state.messages = globalThis.__lp_outbox.splice(0, globalThis.__lp_outbox.length);
    }
    if (globalThis.__lp_timer_requests) {
        state.timers = globalThis.__lp_timer_requests.splice(0, globalThis.__lp_timer_requests.length);
    }
    return JSON.stringify(state);
})()
"#;

/// Statement that fires one due timer callback inside the guest.
pub fn fire_timer_source(timer_id: u64) -> String {
    format!("globalThis.__lp_fireTimer({timer_id});")
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{Context, Source};
    use serde_json::Value;

    fn harvest(context: &mut Context) -> Value {
        let raw = context
            .eval(Source::from_bytes(HARVEST_SOURCE))
            .unwrap()
            .as_string()
            .map(|s| s.to_std_string_escaped())
            .unwrap();
        serde_json::from_str(&raw).unwrap()
    }

    fn shim_context() -> Context {
        let mut context = Context::default();
        context.eval(Source::from_bytes(SHIM_SOURCE)).unwrap();
        context
    }

    #[test]
    fn test_console_methods_reach_outbox_in_order() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "console.log('a'); console.warn('b'); console.info('c'); console.error('d');",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        let methods: Vec<&str> = messages
            .iter()
            .map(|m| m["method"].as_str().unwrap())
            .collect();
        assert_eq!(methods, ["log", "warn", "info", "error"]);
        for message in messages {
            assert_eq!(message["type"], "console");
        }
        assert_eq!(messages[0]["args"][0], "a");
    }

    #[test]
    fn test_object_formatting_is_deterministic_json() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "console.log({ a: 1, b: [2, 3] }); console.log([1, 'x']);",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        let first = messages[0]["args"][0].as_str().unwrap();
        assert!(first.contains("\"a\": 1"));
        assert!(!first.contains("[object Object]"));
        let second = messages[1]["args"][0].as_str().unwrap();
        assert!(second.starts_with('['));
    }

    #[test]
    fn test_circular_reference_falls_back_to_string() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "var o = { name: 'loop' }; o.self = o; console.log(o);",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        // JSON.stringify throws on the cycle; String(value) is the fallback.
        assert_eq!(messages[0]["args"][0], "[object Object]");
    }

    #[test]
    fn test_guarded_run_converts_throw_to_error_event() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "globalThis.__lp_run(\"throw new Error('boom')\");",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "error");
        assert!(messages[0]["args"][0].as_str().unwrap().contains("boom"));
    }

    #[test]
    fn test_guarded_run_reports_reference_error_once() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes("globalThis.__lp_run(\"undefinedFn()\");"))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "error");
        assert!(messages[0]["args"][0]
            .as_str()
            .unwrap()
            .contains("undefinedFn"));
    }

    #[test]
    fn test_guarded_run_surfaces_syntax_error_as_runtime_event() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "globalThis.__lp_run(\"function ( {\");",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "error");
    }

    #[test]
    fn test_set_timeout_registers_request_without_firing() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "var t = setTimeout(function () { console.log('late'); }, 50);",
            ))
            .unwrap();

        let state = harvest(&mut context);
        assert!(state["messages"].as_array().unwrap().is_empty());
        let timers = state["timers"].as_array().unwrap();
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0]["delay"], 50);

        let id = timers[0]["id"].as_u64().unwrap();
        context
            .eval(Source::from_bytes(&fire_timer_source(id)))
            .unwrap();
        let state = harvest(&mut context);
        assert_eq!(state["messages"].as_array().unwrap().len(), 1);
        assert_eq!(state["messages"][0]["args"][0], "late");
    }

    #[test]
    fn test_clear_timeout_makes_fire_a_noop() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "var t = setTimeout(function () { console.log('late'); }, 50); clearTimeout(t);",
            ))
            .unwrap();

        let state = harvest(&mut context);
        let id = state["timers"][0]["id"].as_u64().unwrap();
        context
            .eval(Source::from_bytes(&fire_timer_source(id)))
            .unwrap();
        let state = harvest(&mut context);
        assert!(state["messages"].as_array().unwrap().is_empty());
    }

    #[test]
    fn test_unhandled_rejection_is_reported() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes("Promise.reject('nope');"))
            .unwrap();
        context.run_jobs();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "error");
        assert!(messages[0]["args"][0]
            .as_str()
            .unwrap()
            .contains("in promise"));
    }

    #[test]
    fn test_handled_rejection_is_not_reported() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes(
                "Promise.reject('nope').catch(function (e) { console.log('caught', e); });",
            ))
            .unwrap();
        context.run_jobs();

        let state = harvest(&mut context);
        let messages = state["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0]["method"], "log");
        assert_eq!(messages[0]["args"][0], "caught");
    }

    #[test]
    fn test_shim_install_is_idempotent() {
        let mut context = shim_context();
        context
            .eval(Source::from_bytes("console.log('before');"))
            .unwrap();
        // Second install (the assembler embeds the shim in the document
        // too) must not reset the outbox.
        context.eval(Source::from_bytes(SHIM_SOURCE)).unwrap();
        let state = harvest(&mut context);
        assert_eq!(state["messages"].as_array().unwrap().len(), 1);
    }
}
