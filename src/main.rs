use clap::Parser;
use featurekit::Opts;
use featurekit::cli::SubCommandExtend;
use featurekit::config::SubCommand;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Show(config) => config.run(&opts),
        SubCommand::Match(config) => config.run(&opts),
        SubCommand::Describe(config) => config.run(&opts),
        SubCommand::Search(config) => config.run(&opts),
    }
}
