//! Stream liveness probing
//!
//! Candidate URLs are checked with a lightweight HTTP request under a bounded
//! worker pool. A single global deadline caps the whole phase: probes still
//! running when it elapses are cancelled and their URLs stay `unknown`, so a
//! slow network never removes channels that simply were not checked in time.

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, StatusCode, header};
use std::collections::{BTreeMap, HashSet};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::{ProbeConfig, ProbeMode};
use crate::errors::{AppError, AppResult, SourceError, SourceResult};
use crate::models::{LivenessStatus, LogicalChannel};

/// Stand-in deadline for budgets too large to represent
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Bytes read from an EPG candidate to recognise its format
const GUIDE_SNIFF_BYTES: usize = 1024;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const GUIDE_MARKERS: &[&str] = &["<?xml", "<tv", "<programme"];

/// A single connectivity check
#[async_trait]
pub trait StreamProbe: Send + Sync {
    /// Must resolve within roughly `timeout`; never errors
    async fn probe(&self, url: &str, timeout: Duration) -> LivenessStatus;

    /// Whether `url` serves an XMLTV guide; by default only reachability is checked
    async fn check_guide(&self, url: &str, timeout: Duration) -> LivenessStatus {
        self.probe(url, timeout).await
    }
}

/// Header-only HTTP probe
pub struct HttpProbe {
    client: Client,
}

impl HttpProbe {
    pub fn new(user_agent: &str) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| AppError::internal(format!("failed to build probe client: {e}")))?;
        Ok(Self { client })
    }

    async fn check(&self, url: &str) -> SourceResult<()> {
        let response = self
            .client
            .head(url)
            .send()
            .await
            .map_err(|e| SourceError::probe_failure(url, e.to_string()))?;

        let status = match response.status() {
            StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                trace!("HEAD not supported by {}, retrying with ranged GET", url);
                self.client
                    .get(url)
                    .header(header::RANGE, "bytes=0-1023")
                    .send()
                    .await
                    .map_err(|e| SourceError::probe_failure(url, e.to_string()))?
                    .status()
            }
            status => status,
        };

        if status.is_success() {
            Ok(())
        } else {
            Err(SourceError::probe_failure(url, format!("HTTP {status}")))
        }
    }

    /// First bytes of a guide candidate
    async fn guide_prefix(&self, url: &str) -> SourceResult<Vec<u8>> {
        let mut response = self
            .client
            .get(url)
            .header(header::RANGE, format!("bytes=0-{}", GUIDE_SNIFF_BYTES - 1))
            .send()
            .await
            .map_err(|e| SourceError::probe_failure(url, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::probe_failure(url, format!("HTTP {status}")));
        }

        let mut prefix = Vec::with_capacity(GUIDE_SNIFF_BYTES);
        while prefix.len() < GUIDE_SNIFF_BYTES {
            match response
                .chunk()
                .await
                .map_err(|e| SourceError::probe_failure(url, e.to_string()))?
            {
                Some(chunk) => prefix.extend_from_slice(&chunk),
                None => break,
            }
        }
        Ok(prefix)
    }
}

#[async_trait]
impl StreamProbe for HttpProbe {
    async fn probe(&self, url: &str, timeout: Duration) -> LivenessStatus {
        if let Some(status) = unprobeable(url) {
            return status;
        }

        let outcome = match tokio::time::timeout(timeout, self.check(url)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::probe_timeout(url)),
        };

        match outcome {
            Ok(()) => LivenessStatus::Alive,
            Err(e) => {
                debug!("{}", e);
                LivenessStatus::Dead
            }
        }
    }

    async fn check_guide(&self, url: &str, timeout: Duration) -> LivenessStatus {
        if let Some(status) = unprobeable(url) {
            return status;
        }

        let outcome = match tokio::time::timeout(timeout, self.guide_prefix(url)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::probe_timeout(url)),
        };

        match outcome {
            Ok(prefix) if looks_like_guide(&prefix) => LivenessStatus::Alive,
            Ok(_) => {
                debug!("{} does not look like an XMLTV guide", url);
                LivenessStatus::Dead
            }
            Err(e) => {
                debug!("{}", e);
                LivenessStatus::Dead
            }
        }
    }
}

/// Status for URLs that cannot be checked over HTTP
fn unprobeable(url: &str) -> Option<LivenessStatus> {
    match Url::parse(url) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => None,
        Ok(parsed) => {
            trace!("Cannot probe {} URL {}", parsed.scheme(), url);
            Some(LivenessStatus::Unknown)
        }
        Err(e) => {
            debug!("Unparsable URL {}: {}", url, e);
            Some(LivenessStatus::Dead)
        }
    }
}

/// Plain or gzipped XMLTV
fn looks_like_guide(prefix: &[u8]) -> bool {
    if prefix.starts_with(GZIP_MAGIC) {
        return true;
    }
    let text = String::from_utf8_lossy(prefix);
    GUIDE_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Outcome of one probing phase
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    pub statuses: BTreeMap<String, LivenessStatus>,
    /// Distinct URLs handed to the pool
    pub submitted: usize,
    /// Distinct URLs whose probes finished before the deadline
    pub completed: usize,
    pub deadline_elapsed: bool,
}

impl ProbeReport {
    /// Every distinct URL starts out unknown
    fn pending<'a>(urls: impl IntoIterator<Item = &'a str>) -> Self {
        let statuses: BTreeMap<String, LivenessStatus> = urls
            .into_iter()
            .map(|url| (url.to_string(), LivenessStatus::Unknown))
            .collect();
        Self {
            submitted: statuses.len(),
            statuses,
            ..Default::default()
        }
    }

    pub fn status(&self, url: &str) -> LivenessStatus {
        self.statuses.get(url).copied().unwrap_or_default()
    }

    pub fn count(&self, status: LivenessStatus) -> usize {
        self.statuses.values().filter(|s| **s == status).count()
    }
}

/// Runs probes under a bounded pool with a global deadline
pub struct LivenessProber {
    probe: Arc<dyn StreamProbe>,
    config: ProbeConfig,
}

impl LivenessProber {
    pub fn new(probe: Arc<dyn StreamProbe>, config: ProbeConfig) -> Self {
        Self { probe, config }
    }

    pub fn with_http(config: ProbeConfig) -> AppResult<Self> {
        let probe = HttpProbe::new(&config.user_agent)?;
        Ok(Self::new(Arc::new(probe), config))
    }

    fn concurrency(&self) -> usize {
        self.config.max_concurrency.max(1)
    }

    /// Probe according to the configured mode
    pub async fn probe_channels(&self, channels: &[LogicalChannel]) -> ProbeReport {
        match self.config.mode {
            ProbeMode::PerUrl => {
                let urls: Vec<&str> = channels
                    .iter()
                    .flat_map(|channel| channel.urls.iter().map(|u| u.url.as_str()))
                    .collect();
                self.probe_all(&urls).await
            }
            ProbeMode::PerChannel => self.probe_per_channel(channels).await,
        }
    }

    /// Absolute deadline for a phase starting now; absurdly long budgets saturate
    fn deadline_from_now(&self) -> Instant {
        let now = Instant::now();
        now.checked_add(self.config.deadline)
            .unwrap_or_else(|| now + FAR_FUTURE)
    }

    /// Probe every distinct URL once
    pub async fn probe_all(&self, urls: &[&str]) -> ProbeReport {
        let deadline = self.deadline_from_now();

        let mut seen = HashSet::new();
        let distinct: Vec<String> = urls
            .iter()
            .filter(|url| seen.insert(**url))
            .map(|url| url.to_string())
            .collect();

        let mut report = ProbeReport::pending(distinct.iter().map(String::as_str));

        info!(
            "Probing {} URLs (concurrency {}, timeout {:?}, deadline {:?})",
            report.submitted,
            self.concurrency(),
            self.config.timeout,
            self.config.deadline
        );

        let results = stream::iter(distinct)
            .map(|url| async move {
                let status = self.probe_with_retries(&url, deadline).await;
                (url, status)
            })
            .buffer_unordered(self.concurrency());

        self.collect(results, deadline, &mut report).await;
        report
    }

    /// Probe each channel's URLs in order until one is alive.
    ///
    /// Results are reported per URL as they finish, so whatever completed
    /// before the deadline is kept even when a channel is interrupted.
    async fn probe_per_channel(&self, channels: &[LogicalChannel]) -> ProbeReport {
        let deadline = self.deadline_from_now();

        let mut report = ProbeReport::pending(
            channels
                .iter()
                .flat_map(|channel| channel.urls.iter().map(|u| u.url.as_str())),
        );

        info!(
            "Probing {} URLs across {} channels (concurrency {}, timeout {:?}, deadline {:?})",
            report.submitted,
            channels.len(),
            self.concurrency(),
            self.config.timeout,
            self.config.deadline
        );

        let results = stream::iter(channels)
            .map(|channel| Box::pin(self.channel_results(channel, deadline)))
            .flatten_unordered(self.concurrency());

        self.collect(results, deadline, &mut report).await;
        report
    }

    /// A channel's URLs probed one after another, stopping after the first alive one
    fn channel_results<'a>(
        &'a self,
        channel: &'a LogicalChannel,
        deadline: Instant,
    ) -> impl Stream<Item = (String, LivenessStatus)> + 'a {
        stream::unfold(
            (channel.urls.iter(), false),
            move |(mut urls, found_alive)| async move {
                if found_alive {
                    return None;
                }
                let url = urls.next()?;
                let status = self.probe_with_retries(&url.url, deadline).await;
                Some((
                    (url.url.clone(), status),
                    (urls, status == LivenessStatus::Alive),
                ))
            },
        )
    }

    /// Drain results into the report until the stream ends or the deadline elapses
    async fn collect<S>(&self, results: S, deadline: Instant, report: &mut ProbeReport)
    where
        S: Stream<Item = (String, LivenessStatus)>,
    {
        let mut results = pin!(results);
        let mut resolved = HashSet::new();
        loop {
            match tokio::time::timeout_at(deadline, results.next()).await {
                Ok(Some((url, status))) => {
                    if resolved.insert(url.clone()) {
                        report.completed += 1;
                    }
                    report.statuses.insert(url, status);
                }
                Ok(None) => break,
                Err(_) => {
                    report.deadline_elapsed = true;
                    break;
                }
            }
        }
        self.log_report(report);
    }

    /// First candidate, in the given order, that serves a programme guide
    pub async fn select_guide(&self, candidates: &[String]) -> Option<String> {
        let deadline = self.deadline_from_now();

        let mut seen = HashSet::new();
        let distinct: Vec<&str> = candidates
            .iter()
            .map(|candidate| candidate.trim())
            .filter(|candidate| !candidate.is_empty() && seen.insert(*candidate))
            .collect();
        if distinct.is_empty() {
            return None;
        }

        info!("Checking {} EPG candidates", distinct.len());

        let checks = stream::iter(distinct)
            .map(|url| async move {
                let status = self.probe.check_guide(url, self.config.timeout).await;
                (url, status)
            })
            .buffered(self.concurrency());
        let mut checks = pin!(checks);

        loop {
            match tokio::time::timeout_at(deadline, checks.next()).await {
                Ok(Some((url, LivenessStatus::Alive))) => {
                    info!("Selected EPG: {}", url);
                    return Some(url.to_string());
                }
                Ok(Some((url, status))) => debug!("EPG candidate {} is {}", url, status),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "Probe deadline of {:?} elapsed while checking EPG candidates",
                        self.config.deadline
                    );
                    break;
                }
            }
        }

        warn!("No working EPG candidate found");
        None
    }

    async fn probe_with_retries(&self, url: &str, deadline: Instant) -> LivenessStatus {
        let mut status = LivenessStatus::Dead;
        for attempt in 0..=self.config.retries {
            if attempt > 0 && Instant::now() >= deadline {
                break;
            }
            status = self.probe.probe(url, self.config.timeout).await;
            if status != LivenessStatus::Dead {
                break;
            }
            trace!("Probe attempt {} for {} came back dead", attempt + 1, url);
        }
        status
    }

    fn log_report(&self, report: &ProbeReport) {
        if report.deadline_elapsed {
            warn!(
                "Probe deadline of {:?} elapsed with {} of {} probes unresolved; keeping them as unknown",
                self.config.deadline,
                report.submitted.saturating_sub(report.completed),
                report.submitted
            );
        }
        info!(
            "Probing finished: {} alive, {} dead, {} unknown",
            report.count(LivenessStatus::Alive),
            report.count(LivenessStatus::Dead),
            report.count(LivenessStatus::Unknown)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Attributes, ChannelUrl, LOWEST_RANK};
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted probe: each URL resolves to a status after a delay
    #[derive(Default)]
    struct ScriptedProbe {
        script: HashMap<String, (Duration, LivenessStatus)>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedProbe {
        fn with(mut self, url: &str, delay_ms: u64, status: LivenessStatus) -> Self {
            self.script
                .insert(url.to_string(), (Duration::from_millis(delay_ms), status));
            self
        }
    }

    #[async_trait]
    impl StreamProbe for ScriptedProbe {
        async fn probe(&self, url: &str, _timeout: Duration) -> LivenessStatus {
            self.calls.lock().unwrap().push(url.to_string());
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);

            let (delay, status) = self
                .script
                .get(url)
                .copied()
                .unwrap_or((Duration::ZERO, LivenessStatus::Dead));
            tokio::time::sleep(delay).await;

            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            status
        }
    }

    fn config(mode: ProbeMode, max_concurrency: usize, deadline_ms: u64) -> ProbeConfig {
        ProbeConfig {
            enabled: true,
            mode,
            max_concurrency,
            timeout: Duration::from_secs(30),
            deadline: Duration::from_millis(deadline_ms),
            retries: 0,
            ..Default::default()
        }
    }

    fn channel(key: &str, urls: &[&str]) -> LogicalChannel {
        LogicalChannel {
            key: key.to_string(),
            display_name: key.to_string(),
            provenance: BTreeSet::new(),
            urls: urls
                .iter()
                .map(|url| ChannelUrl {
                    url: url.to_string(),
                    origin: "test".to_string(),
                    status: LivenessStatus::Unknown,
                })
                .collect(),
            attributes: Attributes::new(),
            duration: "-1".to_string(),
            rank: LOWEST_RANK,
        }
    }

    #[tokio::test]
    async fn test_probe_all_maps_results() {
        let probe = ScriptedProbe::default()
            .with("http://a", 0, LivenessStatus::Alive)
            .with("http://b", 0, LivenessStatus::Dead);
        let prober = LivenessProber::new(Arc::new(probe), config(ProbeMode::PerUrl, 4, 5_000));

        let report = prober.probe_all(&["http://a", "http://b", "http://a"]).await;

        assert_eq!(report.submitted, 2);
        assert_eq!(report.completed, 2);
        assert!(!report.deadline_elapsed);
        assert_eq!(report.status("http://a"), LivenessStatus::Alive);
        assert_eq!(report.status("http://b"), LivenessStatus::Dead);
    }

    #[tokio::test]
    async fn test_deadline_marks_pending_unknown() {
        let probe = ScriptedProbe::default()
            .with("http://fast", 0, LivenessStatus::Alive)
            .with("http://slow", 10_000, LivenessStatus::Alive);
        let prober = LivenessProber::new(Arc::new(probe), config(ProbeMode::PerUrl, 4, 200));

        let started = std::time::Instant::now();
        let report = prober.probe_all(&["http://fast", "http://slow"]).await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.deadline_elapsed);
        assert_eq!(report.status("http://fast"), LivenessStatus::Alive);
        assert_eq!(report.status("http://slow"), LivenessStatus::Unknown);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut probe = ScriptedProbe::default();
        let urls: Vec<String> = (0..12).map(|i| format!("http://host/{i}")).collect();
        for url in &urls {
            probe = probe.with(url, 20, LivenessStatus::Alive);
        }
        let probe = Arc::new(probe);
        let prober = LivenessProber::new(probe.clone(), config(ProbeMode::PerUrl, 3, 10_000));

        let refs: Vec<&str> = urls.iter().map(String::as_str).collect();
        let report = prober.probe_all(&refs).await;

        assert_eq!(report.count(LivenessStatus::Alive), 12);
        assert!(probe.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let probe = Arc::new(ScriptedProbe::default().with("http://x", 0, LivenessStatus::Dead));
        let mut cfg = config(ProbeMode::PerUrl, 1, 5_000);
        cfg.retries = 2;
        let prober = LivenessProber::new(probe.clone(), cfg);

        let report = prober.probe_all(&["http://x"]).await;

        assert_eq!(report.status("http://x"), LivenessStatus::Dead);
        assert_eq!(probe.calls.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_per_channel_stops_at_first_alive() {
        let probe = Arc::new(
            ScriptedProbe::default()
                .with("http://a/1", 0, LivenessStatus::Dead)
                .with("http://a/2", 0, LivenessStatus::Alive)
                .with("http://a/3", 0, LivenessStatus::Alive),
        );
        let prober = LivenessProber::new(probe.clone(), config(ProbeMode::PerChannel, 2, 5_000));

        let report = prober
            .probe_channels(&[channel("a", &["http://a/1", "http://a/2", "http://a/3"])])
            .await;

        assert_eq!(report.status("http://a/1"), LivenessStatus::Dead);
        assert_eq!(report.status("http://a/2"), LivenessStatus::Alive);
        assert_eq!(report.status("http://a/3"), LivenessStatus::Unknown);
        assert_eq!(probe.calls.lock().unwrap().len(), 2);
    }


    #[tokio::test]
    async fn test_huge_deadline_saturates() {
        let probe = Arc::new(ScriptedProbe::default().with("http://a", 0, LivenessStatus::Alive));
        for mode in [ProbeMode::PerUrl, ProbeMode::PerChannel] {
            let mut cfg = config(mode, 2, 0);
            cfg.deadline = Duration::MAX;
            let prober = LivenessProber::new(probe.clone(), cfg);

            let report = prober.probe_channels(&[channel("a", &["http://a"])]).await;

            assert!(!report.deadline_elapsed);
            assert_eq!(report.status("http://a"), LivenessStatus::Alive);
        }
    }

    #[tokio::test]
    async fn test_per_channel_keeps_results_finished_before_deadline() {
        let probe = Arc::new(
            ScriptedProbe::default()
                .with("http://a/1", 0, LivenessStatus::Dead)
                .with("http://b/1", 0, LivenessStatus::Dead)
                .with("http://b/2", 10_000, LivenessStatus::Alive),
        );
        let prober = LivenessProber::new(probe, config(ProbeMode::PerChannel, 2, 300));

        let started = std::time::Instant::now();
        let report = prober
            .probe_channels(&[
                channel("a", &["http://a/1"]),
                channel("b", &["http://b/1", "http://b/2"]),
            ])
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.deadline_elapsed);
        assert_eq!(report.submitted, 3);
        assert_eq!(report.completed, 2);
        assert_eq!(report.status("http://a/1"), LivenessStatus::Dead);
        assert_eq!(report.status("http://b/1"), LivenessStatus::Dead);
        assert_eq!(report.status("http://b/2"), LivenessStatus::Unknown);
    }

    #[tokio::test]
    async fn test_per_channel_counts_shared_urls_once() {
        let probe = Arc::new(ScriptedProbe::default().with("http://shared", 0, LivenessStatus::Alive));
        let prober = LivenessProber::new(probe, config(ProbeMode::PerChannel, 2, 5_000));

        let report = prober
            .probe_channels(&[
                channel("a", &["http://shared"]),
                channel("b", &["http://shared"]),
            ])
            .await;

        assert_eq!(report.submitted, 1);
        assert_eq!(report.completed, 1);
        assert_eq!(report.status("http://shared"), LivenessStatus::Alive);
    }

    #[tokio::test]
    async fn test_select_guide_keeps_candidate_order() {
        let probe = Arc::new(
            ScriptedProbe::default()
                .with("http://epg/down.xml", 0, LivenessStatus::Dead)
                .with("http://epg/primary.xml", 100, LivenessStatus::Alive)
                .with("http://epg/backup.xml", 0, LivenessStatus::Alive),
        );
        let prober = LivenessProber::new(probe.clone(), config(ProbeMode::PerUrl, 4, 5_000));

        let candidates = [
            "http://epg/down.xml",
            " ",
            "http://epg/down.xml",
            "http://epg/primary.xml",
            "http://epg/backup.xml",
        ]
        .map(String::from);
        let selected = prober.select_guide(&candidates).await;

        assert_eq!(selected.as_deref(), Some("http://epg/primary.xml"));
        let calls = probe.calls.lock().unwrap();
        assert_eq!(
            calls.iter().filter(|url| *url == "http://epg/down.xml").count(),
            1
        );
    }

    #[tokio::test]
    async fn test_select_guide_without_working_candidate() {
        let probe = Arc::new(ScriptedProbe::default());
        let prober = LivenessProber::new(probe, config(ProbeMode::PerUrl, 4, 5_000));

        assert_eq!(prober.select_guide(&[]).await, None);
        assert_eq!(
            prober
                .select_guide(&["http://epg/a.xml".to_string(), "http://epg/b.xml".to_string()])
                .await,
            None
        );
    }

    #[test]
    fn test_guide_sniffing() {
        assert!(looks_like_guide(b"<?xml version=\"1.0\"?><tv>"));
        assert!(looks_like_guide(b"<tv generator-info-name=\"x\">"));
        assert!(looks_like_guide(&[0x1f, 0x8b, 0x08, 0x00]));
        assert!(!looks_like_guide(b"<!DOCTYPE html><html>"));
        assert!(!looks_like_guide(b""));
    }

    #[tokio::test]
    async fn test_http_probe_skips_non_http_schemes() {
        let probe = HttpProbe::new("test").unwrap();
        assert_eq!(
            probe.probe("rtmp://live.example.com/app", Duration::from_secs(1)).await,
            LivenessStatus::Unknown
        );
        assert_eq!(
            probe.probe("not a url", Duration::from_secs(1)).await,
            LivenessStatus::Dead
        );
    }
}
