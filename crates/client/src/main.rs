use clap::{Parser, Subcommand};
use ctx_common::{
    Comparison, ComponentIndex, Deregistration, ElementKind, Heartbeat, LeaseStatus, Query,
    QueryReply, QueryRequest, Registration, RegistrationReply, WireMessage,
};
use reqwest::Client;
use std::time::Duration;
use tokio::time;

const BASE_URL: &str = "http://localhost:5555";
const DEFAULT_TIME_SLOT_SECS: u64 = 60;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Discovery daemon address
    #[arg(long, default_value = BASE_URL)]
    url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ComponentArgs {
    id: String,
    #[arg(long, default_value = "localhost")]
    hostname: String,
    #[arg(long)]
    port: u16,
    #[arg(long = "type", default_value = "")]
    component_type: String,
    #[arg(long = "attribute")]
    attributes: Vec<String>,
    #[arg(long = "callback")]
    callbacks: Vec<String>,
    #[arg(long = "service")]
    services: Vec<String>,
    /// Lease length in time slots (daemon default if omitted)
    #[arg(long)]
    slots: Option<u32>,
}

impl ComponentArgs {
    fn into_registration(self) -> Registration {
        Registration {
            id: self.id,
            hostname: self.hostname,
            port: self.port,
            component_type: self.component_type,
            attributes: self.attributes,
            callbacks: self.callbacks,
            services: self.services,
            lease_slots: self.slots,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Register a component
    Register(ComponentArgs),
    /// Renew a component's lease
    Heartbeat {
        index: u32,
        #[arg(long)]
        slots: Option<u32>,
    },
    /// Remove a component
    Deregister {
        index: u32,
    },
    /// Find components, e.g. `query id=w1 'port>=1520'`
    Query {
        /// Predicates of the form <kind><op><value>, op one of = != >= <= > <
        #[arg(required = true)]
        predicates: Vec<String>,
        /// Match any predicate instead of all
        #[arg(long)]
        any: bool,
        /// Negate the combined expression
        #[arg(long)]
        not: bool,
    },
    /// List all active leases
    Leases,
    /// Register a component and renew its lease in a loop
    Loop {
        #[command(flatten)]
        component: ComponentArgs,
        /// Time slot length used by the daemon, in seconds
        #[arg(long, default_value_t = DEFAULT_TIME_SLOT_SECS)]
        time_slot: u64,
    },
}

/// Parses `kind<op>value`, trying two-character operators first.
fn parse_predicate(raw: &str) -> Result<Query, String> {
    const OPERATORS: [Comparison; 6] = [
        Comparison::Different,
        Comparison::GreaterEqual,
        Comparison::LessEqual,
        Comparison::Equal,
        Comparison::Greater,
        Comparison::Less,
    ];

    for comparison in OPERATORS {
        if let Some((kind, value)) = raw.split_once(comparison.symbol()) {
            let kind: ElementKind = kind.trim().parse()?;
            return Ok(Query::item(kind, value.trim(), comparison));
        }
    }
    Err(format!("'{}' is not of the form <kind><op><value>", raw))
}

fn build_query(predicates: &[String], any: bool, not: bool) -> Result<Query, String> {
    let mut items = predicates.iter().map(|p| parse_predicate(p));
    let first = items.next().ok_or("at least one predicate is required")??;
    let combined = items.try_fold(first, |acc, item| {
        let item = item?;
        Ok::<_, String>(if any {
            Query::or(acc, item)
        } else {
            Query::and(acc, item)
        })
    })?;
    Ok(if not { Query::not(combined) } else { combined })
}

async fn post<M: WireMessage>(
    client: &Client,
    url: &str,
    path: &str,
    message: &M,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let resp = client
        .post(format!("{}{}", url, path))
        .header(reqwest::header::CONTENT_TYPE, "application/xml")
        .body(message.to_wire()?)
        .send()
        .await?;
    Ok(resp)
}

async fn register(
    client: &Client,
    url: &str,
    registration: &Registration,
) -> Result<Option<RegistrationReply>, Box<dyn std::error::Error>> {
    let resp = post(client, url, "/register", registration).await?;
    if resp.status().is_success() {
        Ok(Some(RegistrationReply::from_wire(&resp.text().await?)?))
    } else {
        eprintln!("Failed to register {}: {}", registration.id, resp.status());
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = Client::new();
    let url = cli.url.trim_end_matches('/').to_string();

    match cli.command {
        Commands::Register(component) => {
            let registration = component.into_registration();
            if let Some(reply) = register(&client, &url, &registration).await? {
                println!(
                    "Registered {} as component {}",
                    registration.id, reply.lease.component_index
                );
                println!(
                    "Lease: {} slot(s) from {:?}",
                    reply.lease.duration_slots, reply.lease.start_date
                );
            } else {
                std::process::exit(1);
            }
        }
        Commands::Heartbeat { index, slots } => {
            let heartbeat = Heartbeat {
                component_index: ComponentIndex(index),
                lease_slots: slots,
            };
            let resp = post(&client, &url, "/heartbeat", &heartbeat).await?;
            if resp.status().is_success() {
                println!("Renewed lease of component {}", index);
            } else {
                eprintln!("Failed to renew lease: {}", resp.status());
                std::process::exit(1);
            }
        }
        Commands::Deregister { index } => {
            let deregistration = Deregistration {
                component_index: ComponentIndex(index),
            };
            let resp = post(&client, &url, "/deregister", &deregistration).await?;
            if resp.status().is_success() {
                println!("Deregistered component {}", index);
            } else {
                eprintln!("Failed to deregister component: {}", resp.status());
                std::process::exit(1);
            }
        }
        Commands::Query { predicates, any, not } => {
            let query = build_query(&predicates, any, not)?;
            let resp = post(&client, &url, "/query", &QueryRequest { query }).await?;
            if resp.status().is_success() {
                let reply = QueryReply::from_wire(&resp.text().await?)?;
                if reply.matches.is_empty() {
                    eprintln!("No matching components");
                    std::process::exit(1);
                }
                for m in reply.matches {
                    println!("{}\t{}", m.component_index, m.id);
                }
            } else {
                eprintln!("Query failed: {}", resp.status());
                std::process::exit(1);
            }
        }
        Commands::Leases => {
            let resp = client.get(format!("{}/leases", url)).send().await?;

            if resp.status().is_success() {
                let leases: Vec<LeaseStatus> = resp.json().await?;
                println!("Active Leases:");
                for lease in leases {
                    let end = lease
                        .end_date
                        .map(|end| end.to_rfc3339())
                        .unwrap_or_else(|| "-".to_string());
                    println!(
                        "Component: {}, Id: {}, Slots: {}, Ends: {}",
                        lease.component_index, lease.component_id, lease.duration_slots, end
                    );
                }
            } else {
                eprintln!("Failed to list leases: {}", resp.status());
            }
        }
        Commands::Loop { component, time_slot } => {
            let registration = component.into_registration();
            let Some(reply) = register(&client, &url, &registration).await? else {
                std::process::exit(1);
            };
            let lease = reply.lease;
            let index = lease.component_index;
            println!("Registered as component {}. Starting heartbeat loop...", index);

            // renew at half the lease length
            let half_lease = (time_slot * u64::from(lease.duration_slots.max(1))).max(2) / 2;
            let mut interval = time::interval(Duration::from_secs(half_lease));
            interval.tick().await;
            loop {
                interval.tick().await;
                let heartbeat = Heartbeat {
                    component_index: index,
                    lease_slots: Some(lease.duration_slots),
                };
                match post(&client, &url, "/heartbeat", &heartbeat).await {
                    Ok(r) if r.status().is_success() => println!("Heartbeat sent for {}", index),
                    Ok(r) => {
                        eprintln!("Heartbeat failed: {}", r.status());
                        break;
                    }
                    Err(e) => {
                        eprintln!("Heartbeat error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}
