use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use regex::Regex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::ScheduleError;
use crate::pool::WorkerPool;

/// The work fired on every tick. Each fire runs on its own task.
pub type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

// ---------------------------------------------------------------------------
// Recurrence
// ---------------------------------------------------------------------------

/// A parsed schedule expression.
#[derive(Debug, Clone)]
pub enum Recurrence {
    /// `@every 90s`: fixed interval, rounded up to a whole second.
    Every(Duration),
    /// Five-field cron or a descriptor, evaluated in UTC.
    Cron(Box<cron::Schedule>),
}

impl Recurrence {
    /// Next fire time strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Recurrence::Every(period) => {
                chrono::Duration::from_std(*period).ok().map(|d| now + d)
            }
            Recurrence::Cron(schedule) => schedule.after(&now).next(),
        }
    }
}

impl FromStr for Recurrence {
    type Err = String;

    fn from_str(expression: &str) -> Result<Self, Self::Err> {
        let expression = expression.trim();
        if let Some(rest) = expression.strip_prefix("@every") {
            let period = parse_duration(rest.trim())?;
            let rounded = Duration::from_secs(period.as_secs() + u64::from(period.subsec_nanos() > 0));
            return Ok(Recurrence::Every(rounded.max(Duration::from_secs(1))));
        }

        let cron_expr = if expression.starts_with('@') {
            match expression {
                "@yearly" | "@annually" => "0 0 0 1 1 *".to_string(),
                "@monthly" => "0 0 0 1 * *".to_string(),
                "@weekly" => "0 0 0 * * SUN".to_string(),
                "@daily" | "@midnight" => "0 0 0 * * *".to_string(),
                "@hourly" => "0 0 * * * *".to_string(),
                other => return Err(format!("unknown descriptor '{other}'")),
            }
        } else {
            let fields: Vec<&str> = expression.split_whitespace().collect();
            if fields.len() != 5 {
                return Err(format!("expected 5 fields, found {}", fields.len()));
            }
            format!(
                "0 {} {} {} {} {}",
                fields[0],
                fields[1],
                fields[2],
                fields[3],
                shift_day_of_week(fields[4])
            )
        };

        cron::Schedule::from_str(&cron_expr)
            .map(|s| Recurrence::Cron(Box::new(s)))
            .map_err(|e| e.to_string())
    }
}

pub fn parse(expression: &str) -> Result<Recurrence, ScheduleError> {
    expression.parse().map_err(|reason| ScheduleError::Parse {
        expression: expression.to_string(),
        reason,
    })
}

/// Standard cron numbers weekdays 0-6 from Sunday, with 7 also Sunday; the
/// `cron` crate numbers them 1-7. Numeric parts (`n`, `a-b`, `a-b/s`,
/// `n/s`) are expanded to explicit lists so a range ending in 7 keeps its
/// Sunday. Names and `*` forms pass through unchanged.
fn shift_day_of_week(field: &str) -> String {
    field
        .split(',')
        .map(|part| expand_weekdays(part).unwrap_or_else(|| part.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

fn expand_weekdays(part: &str) -> Option<String> {
    let (range, step) = match part.split_once('/') {
        Some((range, step)) => (range, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (part, 1),
    };
    let (start, end) = match range.split_once('-') {
        Some((a, b)) => (a.parse::<u32>().ok()?, b.parse::<u32>().ok()?),
        None => {
            let n = range.parse::<u32>().ok()?;
            (n, if step > 1 { 6 } else { n })
        }
    };
    if start > end || end > 7 {
        return None;
    }
    let mut days: Vec<u32> = (start..=end).step_by(step).map(|n| n % 7 + 1).collect();
    days.sort_unstable();
    days.dedup();
    Some(
        days.iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

static DURATION_RE: OnceLock<Regex> = OnceLock::new();

/// Parse a Go-style duration such as `1m30s`, `2h` or `500ms`.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let re = DURATION_RE
        .get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)(ns|us|µs|ms|s|m|h)").unwrap());
    if input.is_empty() {
        return Err("empty duration".into());
    }

    let mut total = 0f64;
    let mut consumed = 0;
    for caps in re.captures_iter(input) {
        let whole = caps.get(0).map(|m| m.range()).unwrap_or(0..0);
        if whole.start != consumed {
            return Err(format!("invalid duration '{input}'"));
        }
        consumed = whole.end;
        let value: f64 = caps[1]
            .parse()
            .map_err(|_| format!("invalid duration '{input}'"))?;
        let unit_secs = match &caps[2] {
            "ns" => 1e-9,
            "us" | "µs" => 1e-6,
            "ms" => 1e-3,
            "s" => 1.0,
            "m" => 60.0,
            _ => 3600.0,
        };
        total += value * unit_secs;
    }
    if consumed != input.len() {
        return Err(format!("invalid duration '{input}'"));
    }
    Duration::try_from_secs_f64(total).map_err(|e| e.to_string())
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Identifies the live schedule. Every successful (re)schedule issues a new
/// one, invalidating the previous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(pub u64);

struct Entry {
    id: EntryId,
    expression: String,
    timer: JoinHandle<()>,
}

/// Fires a job on a recurrence. At most one schedule is live at a time.
pub struct Scheduler {
    job: JobFn,
    entry: Option<Entry>,
    next_id: u64,
}

impl Scheduler {
    pub fn new(job: JobFn) -> Self {
        Self {
            job,
            entry: None,
            next_id: 1,
        }
    }

    /// Install `expression`, replacing any live schedule. The expression is
    /// parsed before anything is stopped, so a bad expression leaves the
    /// current schedule running.
    pub fn schedule(&mut self, expression: &str) -> Result<EntryId, ScheduleError> {
        let recurrence = parse(expression)?;
        self.stop();

        let id = EntryId(self.next_id);
        self.next_id += 1;
        let timer = tokio::spawn(run_timer(recurrence, Arc::clone(&self.job), id));
        self.entry = Some(Entry {
            id,
            expression: expression.to_string(),
            timer,
        });
        info!(schedule = expression, entry = id.0, "job scheduled");
        Ok(id)
    }

    /// Replace the schedule unless `pool` has queued tasks, in which case
    /// the current schedule stays live and [`ScheduleError::Busy`] is
    /// returned so the caller can retry later.
    pub fn reschedule(
        &mut self,
        expression: &str,
        pool: &WorkerPool,
    ) -> Result<EntryId, ScheduleError> {
        let waiting = pool.waiting_tasks();
        if waiting > 0 {
            return Err(ScheduleError::Busy { waiting });
        }
        let id = self.schedule(expression)?;
        debug!(entry = id.0, "re-scheduled job");
        Ok(id)
    }

    /// Stop firing. Runs already in progress are not interrupted.
    pub fn stop(&mut self) {
        if let Some(entry) = self.entry.take() {
            entry.timer.abort();
            debug!(entry = entry.id.0, "schedule stopped");
        }
    }

    pub fn entry_id(&self) -> Option<EntryId> {
        self.entry.as_ref().map(|e| e.id)
    }

    pub fn expression(&self) -> Option<&str> {
        self.entry.as_ref().map(|e| e.expression.as_str())
    }

    pub fn is_running(&self) -> bool {
        self.entry.as_ref().is_some_and(|e| !e.timer.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_timer(recurrence: Recurrence, job: JobFn, id: EntryId) {
    match recurrence {
        Recurrence::Every(period) => {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                fire(&job, id);
            }
        }
        Recurrence::Cron(schedule) => loop {
            let now = Utc::now();
            let Some(next) = schedule.after(&now).next() else {
                warn!(entry = id.0, "schedule has no upcoming fire time");
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tokio::time::sleep(wait).await;
            fire(&job, id);
        },
    }
}

fn fire(job: &JobFn, id: EntryId) {
    debug!(entry = id.0, "schedule fired");
    tokio::spawn(job());
}
