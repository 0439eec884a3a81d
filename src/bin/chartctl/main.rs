use clap::{Parser, Subcommand};

use chartagent::{
    agent::DataPlottingAgent,
    csv_table::{parse_csv, sanitize_for_csv_injection},
    error::Error,
    llama::{LlamaCli, TextCompletion},
    settings::Settings,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML file containing the program settings
    #[arg(short, long, default_value = "settings.toml")]
    settings: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the settings load and that llama-cli and a model are in place
    ValidateSettings {
        /// Print out the loaded settings
        #[arg(short = 'P', long, default_value_t = false)]
        print: bool,
    },
    /// Send a raw prompt to llama-cli and print the completion
    Complete {
        #[arg()]
        prompt: String,
    },
    /// Run the plotting agent on a local CSV file and print the response
    Chart {
        /// CSV file to plot
        #[arg(long)]
        csv: String,

        /// What to plot
        #[arg(long)]
        prompt: String,
    },
}

fn main() -> Result<(), Error> {
    let args: Args = Args::parse();
    let s = Settings::load(&args.settings)?;
    s.setup_logging("chartctl")?;

    match args.command {
        Commands::ValidateSettings { print } => {
            if print {
                println!("{s:#?}");
            }
            let llm = LlamaCli::locate(&s.llama)?;
            println!(
                "{}",
                serde_json::to_string_pretty(llm.identifying_params())?
            );
            println!("Settings OK");
        }
        Commands::Complete { prompt } => {
            let llm = LlamaCli::locate(&s.llama)?;
            println!("{}", llm.complete(&prompt, &[])?);
        }
        Commands::Chart { csv, prompt } => {
            let contents = std::fs::read(&csv)
                .inspect_err(|e| log::error!("Could not read {csv}: {e}"))?;
            let table = sanitize_for_csv_injection(parse_csv(&contents)?);
            if table.is_empty() {
                return Error::err_string(format!("{csv} contains no data"));
            }
            let llm = LlamaCli::locate(&s.llama)?;
            let agent = DataPlottingAgent::new(Box::new(llm), &s.agent);
            let response = agent.process_data_and_plot(&table, &prompt);
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
    }
    Ok(())
}
