// Copyright 2024-2026 Coverage Agent Contributors
// SPDX-License-Identifier: Apache-2.0

//! JVMTI agent entry points.
//!
//! Load with `-agentpath:/path/to/libcoverage_agent.so=com.acme,org.shop`.
//! The options string is the prefix list; everything else comes from the
//! `COVERAGE_AGENT_*` environment (see [`crate::config`]).
//!
//! Only the handful of JNI and JVMTI table slots the agent calls are bound.
//! Slot numbers follow the JVMTI function numbering (1-based).

use std::ffi::{c_char, c_int, c_uchar, c_void, CStr};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::bootstrap::{Bootstrap, HostEnvironment, HostError};
use crate::classfile::constant_pool::decode_modified_utf8;
use crate::config;
use crate::hook::LoadHook;
use crate::telemetry::{init_logging, LogError};

type Jint = c_int;
type Jlong = i64;
type JvmtiError = c_int;

const JNI_OK: Jint = 0;
const JNI_ERR: Jint = -1;
const JVMTI_VERSION_1_2: Jint = 0x3001_0200;
const JVMTI_ERROR_NONE: JvmtiError = 0;
const JVMTI_ENABLE: c_int = 1;
const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: c_int = 54;

/// `JavaVM` invocation table slot of `GetEnv`.
const GET_ENV_SLOT: usize = 6;
const SET_EVENT_NOTIFICATION_MODE: usize = 2;
const ALLOCATE: usize = 46;
const SET_EVENT_CALLBACKS: usize = 122;

/// Events 50 (VMInit) through 84; ClassFileLoadHook is the fifth.
const CALLBACK_SLOTS: usize = 35;
const CLASS_FILE_LOAD_HOOK_SLOT: usize = 4;

type Table = *const *const c_void;

type GetEnvFn = unsafe extern "system" fn(*mut Table, *mut *mut c_void, Jint) -> Jint;
type SetEventNotificationModeFn =
    unsafe extern "C" fn(*mut Table, c_int, c_int, *mut c_void, ...) -> JvmtiError;
type AllocateFn = unsafe extern "system" fn(*mut Table, Jlong, *mut *mut c_uchar) -> JvmtiError;
type SetEventCallbacksFn =
    unsafe extern "system" fn(*mut Table, *const EventCallbacks, Jint) -> JvmtiError;

type ClassFileLoadHookFn = unsafe extern "system" fn(
    *mut Table,
    *mut c_void,
    *mut c_void,
    *mut c_void,
    *const c_char,
    *mut c_void,
    Jint,
    *const c_uchar,
    *mut Jint,
    *mut *mut c_uchar,
);

#[repr(C)]
struct EventCallbacks {
    slots: [*const c_void; CALLBACK_SLOTS],
}

static HOOK: OnceLock<Arc<dyn LoadHook>> = OnceLock::new();
static AGENT: Mutex<Option<Bootstrap>> = Mutex::new(None);

/// Function pointer at a 1-based JVMTI slot.
unsafe fn jvmti_fn(env: *mut Table, slot: usize) -> *const c_void {
    *(*env).add(slot - 1)
}

struct JvmtiHost {
    env: *mut Table,
}

impl HostEnvironment for JvmtiHost {
    fn register(&mut self, hook: Arc<dyn LoadHook>) -> Result<(), HostError> {
        if HOOK.set(hook).is_err() {
            return Err(HostError("load hook already registered".into()));
        }

        let mut callbacks = EventCallbacks {
            slots: [std::ptr::null(); CALLBACK_SLOTS],
        };
        let hook_fn: ClassFileLoadHookFn = class_file_load_hook;
        callbacks.slots[CLASS_FILE_LOAD_HOOK_SLOT] = hook_fn as *const c_void;

        // SAFETY: `env` came from a successful GetEnv for JVMTI 1.2 and the
        // slots below exist in every table of that version.
        unsafe {
            let set_callbacks: SetEventCallbacksFn =
                std::mem::transmute(jvmti_fn(self.env, SET_EVENT_CALLBACKS));
            let size = std::mem::size_of::<EventCallbacks>() as Jint;
            let rc = set_callbacks(self.env, &callbacks, size);
            if rc != JVMTI_ERROR_NONE {
                return Err(HostError(format!("SetEventCallbacks returned {}", rc)));
            }

            let set_mode: SetEventNotificationModeFn =
                std::mem::transmute(jvmti_fn(self.env, SET_EVENT_NOTIFICATION_MODE));
            let rc = set_mode(
                self.env,
                JVMTI_ENABLE,
                JVMTI_EVENT_CLASS_FILE_LOAD_HOOK,
                std::ptr::null_mut(),
            );
            if rc != JVMTI_ERROR_NONE {
                return Err(HostError(format!("SetEventNotificationMode returned {}", rc)));
            }
        }
        Ok(())
    }
}

unsafe extern "system" fn class_file_load_hook(
    jvmti: *mut Table,
    _jni: *mut c_void,
    class_being_redefined: *mut c_void,
    _loader: *mut c_void,
    name: *const c_char,
    _protection_domain: *mut c_void,
    class_data_len: Jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut Jint,
    new_class_data: *mut *mut c_uchar,
) {
    // Redefinitions carry bytes that were already instrumented at first load.
    if !class_being_redefined.is_null() || class_data.is_null() || class_data_len <= 0 {
        return;
    }
    let Some(hook) = HOOK.get() else { return };

    let name = if name.is_null() {
        String::new()
    } else {
        decode_modified_utf8(CStr::from_ptr(name).to_bytes()).into_owned()
    };
    let bytes = std::slice::from_raw_parts(class_data, class_data_len as usize);

    let rewritten = match hook.on_load(&name, bytes) {
        std::borrow::Cow::Borrowed(_) => return,
        std::borrow::Cow::Owned(rewritten) => rewritten,
    };
    let Ok(len) = Jint::try_from(rewritten.len()) else {
        warn!(unit = %name, "rewritten class too large for the VM, keeping original");
        return;
    };

    let allocate: AllocateFn = std::mem::transmute(jvmti_fn(jvmti, ALLOCATE));
    let mut mem: *mut c_uchar = std::ptr::null_mut();
    if allocate(jvmti, len as Jlong, &mut mem) != JVMTI_ERROR_NONE || mem.is_null() {
        warn!(unit = %name, "JVMTI Allocate failed, keeping original");
        return;
    }
    std::ptr::copy_nonoverlapping(rewritten.as_ptr(), mem, rewritten.len());
    *new_class_data_len = len;
    *new_class_data = mem;
}

/// # Safety
///
/// Called by the JVM with a valid `JavaVM` pointer.
#[no_mangle]
pub unsafe extern "system" fn Agent_OnLoad(
    vm: *mut Table,
    options: *const c_char,
    _reserved: *mut c_void,
) -> Jint {
    let options = if options.is_null() {
        String::new()
    } else {
        CStr::from_ptr(options).to_string_lossy().into_owned()
    };

    let config = match config::load(&options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("coverage-agent: {}", e);
            return JNI_ERR;
        }
    };
    match init_logging(&config.log) {
        Ok(()) | Err(LogError::AlreadyInitialized) => {}
        Err(e) => eprintln!("coverage-agent: logging disabled: {}", e),
    }

    let get_env: GetEnvFn = std::mem::transmute(*(*vm).add(GET_ENV_SLOT));
    let mut env: *mut c_void = std::ptr::null_mut();
    if get_env(vm, &mut env, JVMTI_VERSION_1_2) != JNI_OK || env.is_null() {
        error!("JVMTI 1.2 environment unavailable");
        return JNI_ERR;
    }

    let mut host = JvmtiHost {
        env: env as *mut Table,
    };
    match Bootstrap::start(config, &mut host) {
        Ok(agent) => {
            info!(state = %agent.state(), "coverage agent loaded");
            *AGENT.lock() = Some(agent);
            JNI_OK
        }
        Err(e) => {
            error!(error = %e, "coverage agent failed to start");
            eprintln!("coverage-agent: {}", e);
            JNI_ERR
        }
    }
}

/// # Safety
///
/// Called by the JVM at shutdown.
#[no_mangle]
pub unsafe extern "system" fn Agent_OnUnload(_vm: *mut Table) {
    if let Some(mut agent) = AGENT.lock().take() {
        agent.shutdown();
        info!(stats = ?agent.stats().snapshot(), "coverage agent unloaded");
    }
}
