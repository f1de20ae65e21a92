use std::error::Error;
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use vetdesk::availability::AvailabilityEngine;
use vetdesk::compactor;
use vetdesk::config::Config;
use vetdesk::notify::NotifyHub;
use vetdesk::provider::InMemoryCalendar;
use vetdesk::queue::QueueEngine;
use vetdesk::visit::VisitOrchestrator;

type CliResult<T> = Result<T, Box<dyn Error>>;

const USAGE: &str = "\
usage: vetdesk <command> [args]

  availability <YYYY-MM-DD> [subject] [slot-minutes]
  rooms <YYYY-MM-DD>
  queue <clinic>            waiting + in-progress entries
  next <clinic>
  history <clinic>
  add <clinic> <patient> <urgent|normal> [complaint...]
  move-up <entry> | move-down <entry> | remove <entry> | dismiss <entry>
  call <entry> <vet>
  active <vet>
  shell                     read commands from stdin

Calendar data for availability comes from the JSON file in VETDESK_CALENDAR.";

struct App {
    queue: Arc<QueueEngine>,
    orchestrator: VisitOrchestrator,
    availability: Option<AvailabilityEngine>,
    compact_threshold: u64,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::from_env()?;
    vetdesk::observability::init(config.metrics_port);

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        eprintln!("{USAGE}");
        std::process::exit(2);
    }

    let app = App::open(&config)?;
    if args[0] == "shell" {
        return app.shell().await;
    }

    let words: Vec<&str> = args.iter().map(String::as_str).collect();
    let output = app.dispatch(&words).await?;
    println!("{output}");
    compactor::compact_if_needed(&app.queue, app.compact_threshold).await;
    Ok(())
}

impl App {
    fn open(config: &Config) -> CliResult<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        let queue = Arc::new(QueueEngine::new(config.wal_path(), Arc::new(NotifyHub::new()))?);

        let (calendar, availability) = match &config.calendar {
            Some(path) => {
                let (calendar, clinic_id) = InMemoryCalendar::load_json(path)?;
                let calendar = Arc::new(calendar);
                let engine = AvailabilityEngine::new(
                    clinic_id,
                    calendar.clone(),
                    calendar.clone(),
                    calendar.clone(),
                    config.schedule_settings()?,
                );
                info!("calendar loaded from {} for clinic {clinic_id}", path.display());
                (calendar, Some(engine))
            }
            None => (Arc::new(InMemoryCalendar::new()), None),
        };

        Ok(Self {
            orchestrator: VisitOrchestrator::new(queue.clone(), calendar),
            queue,
            availability,
            compact_threshold: config.compact_threshold,
        })
    }

    fn availability(&self) -> CliResult<&AvailabilityEngine> {
        self.availability
            .as_ref()
            .ok_or_else(|| "VETDESK_CALENDAR is not set".into())
    }

    async fn dispatch(&self, words: &[&str]) -> CliResult<String> {
        match words {
            ["availability", date, rest @ ..] => {
                let subject = rest.first().map(|s| ulid(s)).transpose()?;
                let slot_minutes = rest.get(1).map(|s| s.parse::<u32>()).transpose()?;
                let result = self
                    .availability()?
                    .compute_availability(date_arg(date)?, subject, slot_minutes)
                    .await?;
                json(&result)
            }
            ["rooms", date] => {
                let date = date_arg(date)?;
                json(&self.availability()?.compute_room_availability(date).await?)
            }
            ["queue", clinic] => json(&self.queue.list(ulid(clinic)?).await),
            ["next", clinic] => json(&self.queue.next(ulid(clinic)?).await),
            ["history", clinic] => json(&self.queue.history(ulid(clinic)?).await),
            ["add", clinic, patient, urgency, complaint @ ..] => {
                let is_urgent = match *urgency {
                    "urgent" => true,
                    "normal" => false,
                    other => return Err(format!("expected urgent or normal, got {other:?}").into()),
                };
                let entry = self
                    .queue
                    .add(ulid(clinic)?, ulid(patient)?, complaint.join(" "), is_urgent)
                    .await?;
                json(&entry)
            }
            ["move-up", id] => json(&self.queue.move_up(ulid(id)?).await?),
            ["move-down", id] => json(&self.queue.move_down(ulid(id)?).await?),
            ["remove", id] => json(&self.queue.remove(ulid(id)?).await?),
            ["dismiss", id] => json(&self.queue.dismiss(ulid(id)?).await?),
            ["call", id, vet] => json(&self.orchestrator.call(ulid(id)?, ulid(vet)?).await?),
            ["active", vet] => json(&self.queue.active_visit(ulid(vet)?).await),
            _ => Err(USAGE.into()),
        }
    }

    /// Long-running front-desk session. Keeps one engine open, compacts in the
    /// background and echoes queue events for watched clinics.
    async fn shell(self) -> CliResult<()> {
        tokio::spawn(compactor::run_compactor(self.queue.clone(), self.compact_threshold));

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let Some(line) = line else { break };
            let words: Vec<&str> = line.split_whitespace().collect();

            match words.as_slice() {
                [] => continue,
                ["quit" | "exit"] => break,
                ["watch", clinic] => match ulid(clinic) {
                    Ok(clinic_id) => self.watch(clinic_id),
                    Err(e) => eprintln!("error: {e}"),
                },
                _ => match self.dispatch(&words).await {
                    Ok(output) => println!("{output}"),
                    Err(e) => eprintln!("error: {e}"),
                },
            }
        }

        info!("vetdesk shell stopped");
        Ok(())
    }

    fn watch(&self, clinic_id: Ulid) {
        let mut rx = self.queue.subscribe(clinic_id);
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match serde_json::to_string(&event) {
                        Ok(line) => println!("event {line}"),
                        Err(e) => tracing::warn!("unprintable queue event: {e}"),
                    },
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(%clinic_id, "watcher lagged, {n} events skipped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        info!(%clinic_id, "watching queue");
    }
}

fn ulid(s: &str) -> CliResult<Ulid> {
    Ulid::from_string(s).map_err(|e| format!("invalid id {s:?}: {e}").into())
}

fn date_arg(s: &str) -> CliResult<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| format!("invalid date {s:?}: {e}").into())
}

fn json<T: Serialize>(value: &T) -> CliResult<String> {
    Ok(serde_json::to_string_pretty(value)?)
}
