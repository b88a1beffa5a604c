use core::ffi::c_longlong;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use cef_capi::{
    cef_base_ref_counted_t, cef_post_delayed_task_fn, cef_post_task_fn, cef_task_t,
    cef_thread_id_t,
};

use crate::bridge::{find_instance, Bridge};
use crate::error::BridgeError;
use crate::ref_counted::{new_ref_counted, RefCountedCore, RefCountedWrapper};

type Action = Box<dyn FnOnce() + Send>;

/// A one shot closure shaped as a native task struct, so it can be handed
/// to the engine's thread pools.
///
/// The closure runs at most once; a scheduler that misbehaves and executes
/// the task twice finds the slot empty the second time.
pub struct ActionTask {
    core: RefCountedCore,
    action: Mutex<Option<Action>>,
}

impl RefCountedWrapper for ActionTask {
    fn core(&self) -> &RefCountedCore {
        &self.core
    }
}

impl ActionTask {
    pub fn new(
        bridge: &Bridge,
        action: impl FnOnce() + Send + 'static,
    ) -> Result<Arc<Self>, BridgeError> {
        new_ref_counted::<cef_task_t, _, _>(bridge, |core, instance| {
            unsafe { (*instance.as_ptr()).execute = Some(execute_callback) };
            Self {
                core,
                action: Mutex::new(Some(Box::new(action))),
            }
        })
    }
}

/// Posts `action` to the engine thread `thread_id` through `post_task`.
///
/// One reference rides along with the struct; the engine releases it after
/// execution, which is what keeps the wrapper alive until then. Returns
/// whether the engine accepted the task.
pub fn post(
    bridge: &Bridge,
    post_task: cef_post_task_fn,
    thread_id: cef_thread_id_t,
    action: impl FnOnce() + Send + 'static,
) -> Result<bool, BridgeError> {
    let task = ActionTask::new(bridge, action)?;
    let instance = task.core.get_native_instance::<cef_task_t>()?;
    let accepted = unsafe { post_task(thread_id, instance.as_ptr()) } != 0;
    if !accepted {
        // the engine refused the handoff, take the reference back
        unsafe {
            cef_base_ref_counted_t::release(instance.as_ptr() as *mut cef_base_ref_counted_t)
        };
    }
    Ok(accepted)
}

/// Like [`post`], with a delay before the task runs.
pub fn post_delayed(
    bridge: &Bridge,
    post_delayed_task: cef_post_delayed_task_fn,
    thread_id: cef_thread_id_t,
    delay: Duration,
    action: impl FnOnce() + Send + 'static,
) -> Result<bool, BridgeError> {
    let task = ActionTask::new(bridge, action)?;
    let instance = task.core.get_native_instance::<cef_task_t>()?;
    let delay_ms = delay.as_millis().min(c_longlong::MAX as u128) as c_longlong;
    let accepted = unsafe { post_delayed_task(thread_id, instance.as_ptr(), delay_ms) } != 0;
    if !accepted {
        unsafe {
            cef_base_ref_counted_t::release(instance.as_ptr() as *mut cef_base_ref_counted_t)
        };
    }
    Ok(accepted)
}

/// `execute` entry point installed in task structs. Runs on whichever
/// engine thread the task was posted to; a panic in the closure is caught
/// here rather than unwound into the engine.
pub(crate) unsafe extern "C" fn execute_callback(this: *mut cef_task_t) {
    let address = this as usize;
    let Some(instance) = find_instance(address) else {
        log::debug!("execute callback for {address:#x} resolved no task");
        return;
    };
    let Ok(task) = instance.downcast::<ActionTask>() else {
        log::error!("execute callback for {address:#x} hit a non-task wrapper");
        debug_assert!(false, "execute callback on a non-task struct {address:#x}");
        return;
    };
    let action = task.action.lock().take();
    if let Some(action) = action {
        if catch_unwind(AssertUnwindSafe(action)).is_err() {
            log::error!("posted task panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cef_capi::TID_UI;

    use crate::testing::init_logging;

    thread_local! {
        static POSTED: RefCell<Vec<(cef_thread_id_t, usize, c_longlong)>> =
            const { RefCell::new(Vec::new()) };
    }

    unsafe extern "C" fn accepting_runner(
        thread_id: cef_thread_id_t,
        task: *mut cef_task_t,
    ) -> core::ffi::c_int {
        POSTED.with(|posted| posted.borrow_mut().push((thread_id, task as usize, 0)));
        1
    }

    unsafe extern "C" fn refusing_runner(
        _thread_id: cef_thread_id_t,
        _task: *mut cef_task_t,
    ) -> core::ffi::c_int {
        0
    }

    unsafe extern "C" fn accepting_delayed_runner(
        thread_id: cef_thread_id_t,
        task: *mut cef_task_t,
        delay_ms: c_longlong,
    ) -> core::ffi::c_int {
        POSTED.with(|posted| posted.borrow_mut().push((thread_id, task as usize, delay_ms)));
        1
    }

    fn take_posted() -> Vec<(cef_thread_id_t, usize, c_longlong)> {
        POSTED.with(|posted| posted.borrow_mut().split_off(0))
    }

    /// Plays the engine's part: run the task, then drop its reference.
    unsafe fn run_and_release(address: usize) {
        let task = address as *mut cef_task_t;
        if let Some(execute) = unsafe { (*task).execute } {
            unsafe { execute(task) };
        }
        unsafe { cef_base_ref_counted_t::release(task as *mut cef_base_ref_counted_t) };
    }

    #[test]
    fn posted_actions_run_exactly_once() {
        init_logging();
        let bridge = Bridge::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&runs);
        let accepted = post(&bridge, accepting_runner, TID_UI, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(accepted);

        let posted = take_posted();
        assert_eq!(posted.len(), 1);
        let (thread_id, address, _) = posted[0];
        assert_eq!(thread_id, TID_UI);

        // a confused scheduler running the task twice is tolerated
        let task = address as *mut cef_task_t;
        unsafe {
            let execute = (*task).execute.unwrap();
            execute(task);
            execute(task);
            cef_base_ref_counted_t::release(task as *mut cef_base_ref_counted_t);
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!bridge.shared().alloc.is_allocated(address));
    }

    #[test]
    fn refused_posts_clean_up_the_task() {
        init_logging();
        let bridge = Bridge::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&runs);
        let accepted = post(&bridge, refusing_runner, TID_UI, move || {
            counted.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        assert!(!accepted);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(bridge.shared().alloc.outstanding(), 0);
    }

    #[test]
    fn delayed_posts_carry_their_delay() {
        init_logging();
        let bridge = Bridge::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counted = Arc::clone(&ran);
        let accepted = post_delayed(
            &bridge,
            accepting_delayed_runner,
            TID_UI,
            Duration::from_millis(250),
            move || {
                counted.fetch_add(1, Ordering::SeqCst);
            },
        )
        .unwrap();
        assert!(accepted);

        let posted = take_posted();
        assert_eq!(posted.len(), 1);
        let (_, address, delay_ms) = posted[0];
        assert_eq!(delay_ms, 250);

        unsafe { run_and_release(address) };
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_actions_never_unwind_into_the_runner() {
        init_logging();
        let bridge = Bridge::new();

        let accepted = post(&bridge, accepting_runner, TID_UI, || {
            panic!("task blew up");
        })
        .unwrap();
        assert!(accepted);

        let posted = take_posted();
        let (_, address, _) = posted[0];
        unsafe { run_and_release(address) };
        assert!(!bridge.shared().alloc.is_allocated(address));
    }
}
