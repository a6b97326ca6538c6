use clap::{ArgAction, Parser, Subcommand};
use docketflow::schema::{AgencySchema, SchemaConfig};
use docketflow::store::agency_schema_name;
use docketflow::Store;

#[derive(Parser, Debug)]
#[command(name = "docketflow", version, about = "Docketflow CLI")]
struct Cli {
    /// Postgres connection string. Falls back to DATABASE_URL.
    #[arg(long)]
    database_url: Option<String>,

    /// Agencies whose schemas to manage (repeatable)
    #[arg(long = "agency", action = ArgAction::Append)]
    agencies: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show planned DDL changes without applying
    SchemaPlan,

    /// Apply DDL changes (create schemas/tables/indexes as needed)
    SchemaSync,

    /// Create an agency schema and register it in the shared directory
    Provision {
        #[arg(long)]
        agency: String,
    },
}

fn schema_config(agencies: &[String]) -> SchemaConfig {
    SchemaConfig {
        control_schema: "public".into(),
        agencies: agencies
            .iter()
            .map(|agency| AgencySchema::new(agency_schema_name(agency)))
            .collect(),
    }
}

#[tokio::main]
async fn main() -> docketflow::Result<()> {
    let cli = Cli::parse();

    let url = match cli
        .database_url
        .or_else(|| std::env::var("DATABASE_URL").ok())
    {
        Some(url) => url,
        None => {
            eprintln!("error: provide --database-url or set DATABASE_URL");
            std::process::exit(2);
        }
    };

    let store = Store::connect(&url).await?;

    match cli.command {
        Commands::SchemaPlan => {
            let plan = store.schema().plan(&schema_config(&cli.agencies)).await?;
            if plan.is_empty() {
                println!("schema up to date");
            }
            for action in &plan.actions {
                println!("-- {}\n{}", action.label(), action.sql());
            }
        }
        Commands::SchemaSync => {
            let plan = store.schema().sync(&schema_config(&cli.agencies)).await?;
            println!("applied {} schema actions", plan.len());
        }
        Commands::Provision { agency } => {
            store.ensure_agency(&agency).await?;
            println!("provisioned agency {agency}");
        }
    }

    Ok(())
}
