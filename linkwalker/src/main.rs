mod report;

use lib_linkwalker::{init_logger, run_ipc_worker, Cli, CrawlMaster, SiteModel, StructOpt};

fn main() {
    use ansi_term::Color::Red;

    let cli = Cli::from_args();

    // Re-entered as a fetch worker by the process backend.
    if let Some(addr) = cli.ipc_worker {
        init_logger(cli.verbose);
        match run_ipc_worker(addr) {
            Ok(()) => std::process::exit(0),
            Err(err) => {
                log::error!("worker process failed: {}", err);
                std::process::exit(2)
            }
        }
    }

    init_logger(cli.verbose);

    match run(cli) {
        Ok(model) => {
            let exit_code = if model.erroneous_count() > 0 { 1 } else { 0 };
            std::process::exit(exit_code)
        }
        Err(err) => {
            eprintln!("{}: {}", Red.bold().paint("error"), err);
            std::process::exit(2)
        }
    }
}

fn run(cli: Cli) -> Result<SiteModel, anyhow::Error> {
    let json = cli.json;
    let config = cli.into_config()?;
    let model = CrawlMaster::new(config).run()?;

    if json {
        report::print_json(&model);
    } else {
        report::print_console(&model);
    }

    Ok(model)
}
