use std::rc::Rc;

use anyhow::{bail, Result};
use log::debug;
use tagflow_contracts::{hooks, RUNTIME_BINDING};

use super::{NativeIds, ShadowRuntime};
use crate::config::EngineConfig;
use crate::engine::{Completion, Engine, Property, Value};
use crate::policy::Policy;

type Hook<P> = fn(&ShadowRuntime<P>, &mut Engine, &[Value]) -> Completion;

fn hook_table<P: Policy>() -> [(&'static str, Hook<P>); 23] {
    [
        (hooks::WRAP_GLOBAL, ShadowRuntime::wrap_global),
        (hooks::GLOBAL, ShadowRuntime::global),
        (hooks::ENTER_SCRIPT, ShadowRuntime::enter_script),
        (hooks::LEAVE_SCRIPT, ShadowRuntime::leave_script),
        (hooks::WRAP_LITERAL, ShadowRuntime::wrap_literal),
        (hooks::PROPREAD, ShadowRuntime::propread),
        (hooks::PROPWRITE, ShadowRuntime::propwrite),
        (hooks::PROPDEL, ShadowRuntime::propdel),
        (hooks::GLOBALREAD, ShadowRuntime::globalread),
        (hooks::FUNCALL, ShadowRuntime::funcall),
        (hooks::METHCALL, ShadowRuntime::methcall),
        (hooks::NEWEXPR, ShadowRuntime::newexpr),
        (hooks::UNOP, ShadowRuntime::unop),
        (hooks::BINOP, ShadowRuntime::binop),
        (hooks::WRAP_FOR_IN_VAR, ShadowRuntime::wrap_for_in_var),
        (hooks::WRAP_NATIVE_EXCEPTION, ShadowRuntime::wrap_native_exception),
        (hooks::UNWRAP, ShadowRuntime::unwrap),
        (hooks::IS_NATIVE_CALL, ShadowRuntime::is_native_call),
        (hooks::CALL_WRAPPED, ShadowRuntime::call_wrapped),
        (hooks::PREPARE_ARGUMENTS, ShadowRuntime::prepare_arguments),
        (hooks::ENTER_FUNCTION, ShadowRuntime::enter_function),
        (hooks::RETURN_FROM_FUNCTION, ShadowRuntime::return_from_function),
        (hooks::LEAVE_FUNCTION, ShadowRuntime::leave_function),
    ]
}

impl<P: Policy + 'static> ShadowRuntime<P> {
    /// Binds the runtime into `engine` as the `__rt` global and captures the
    /// engine's native `call`/`apply`. One runtime per engine.
    pub fn install(runtime: &Rc<Self>, engine: &mut Engine) -> Result<()> {
        if engine.global_get(RUNTIME_BINDING).is_some() {
            bail!("`{RUNTIME_BINDING}` is already bound in this engine");
        }
        runtime.natives.set(Some(NativeIds {
            call: engine.intrinsics.function_call,
            apply: engine.intrinsics.function_apply,
        }));
        let binding = engine.new_object();
        for (name, hook) in hook_table::<P>() {
            let rt = Rc::clone(runtime);
            let f = engine.new_native_function(name, move |engine, _this, args| {
                hook(&rt, engine, args)
            });
            engine
                .heap
                .define(binding, name, Property::hidden(Value::Object(f)));
        }
        engine.define_global(RUNTIME_BINDING, Value::Object(binding));
        debug!(
            "shadow runtime installed as `{RUNTIME_BINDING}` with {} hooks",
            hooks::ALL.len()
        );
        Ok(())
    }
}

/// Fresh engine with a runtime for `policy` already installed.
pub fn engine_with_runtime<P: Policy + 'static>(
    policy: P,
    config: EngineConfig,
) -> Result<(Engine, Rc<ShadowRuntime<P>>)> {
    let mut engine = Engine::new(config);
    let runtime = ShadowRuntime::new(policy);
    ShadowRuntime::install(&runtime, &mut engine)?;
    Ok((engine, runtime))
}
