use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;

/// Dependencies that flood the log once the root level drops to debug. They
/// stay pinned no matter how verbose the crawl itself runs.
const NOISY_DEPS: &[(&str, LevelFilter)] = &[
    ("html5ever", LevelFilter::Error),
    ("hyper", LevelFilter::Info),
    ("rustls", LevelFilter::Error),
    ("tarpc", LevelFilter::Error),
];

/// Stderr console logger; stdout stays clean for the report. Worker processes
/// call this too, so their lines interleave with the coordinator's on the
/// same stream.
pub fn init_logger(is_verbose: bool) -> log4rs::Handle {
    let pattern = PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S%.3f)} [{M}:{L} {T}] {h({l})} {m}{n}");

    let console = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(pattern))
        .build();

    let root_level = if is_verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut builder =
        Config::builder().appender(Appender::builder().build("stderr", Box::new(console)));
    for (target, level) in NOISY_DEPS {
        builder = builder.logger(Logger::builder().build((*target).to_owned(), *level));
    }

    let config = builder
        .build(Root::builder().appender("stderr").build(root_level))
        .expect("could not config logger");

    log4rs::init_config(config).expect("could not start logger")
}
