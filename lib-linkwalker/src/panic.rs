use backtrace::Backtrace;
use std::{panic, thread};

/// Routes panics into `log::error!`, backtrace included. Workers run on their
/// own threads; a panic that only hits stderr of a detached thread is easy to
/// miss.
pub fn log_panics() {
    panic::set_hook(Box::new(|info| {
        let thread = thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");

        let msg = match info.payload().downcast_ref::<&'static str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => s.as_str(),
                None => "Box<Any>",
            },
        };

        let backtrace = Backtrace::new();

        match info.location() {
            Some(location) => log::error!(
                target: "panic",
                "thread '{}' panicked at '{}': {}:{}\n{:?}",
                thread_name,
                msg,
                location.file(),
                location.line(),
                backtrace,
            ),
            None => log::error!(
                target: "panic",
                "thread '{}' panicked at '{}'\n{:?}",
                thread_name,
                msg,
                backtrace,
            ),
        }
    }));
}
