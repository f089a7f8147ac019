use crate::config::{dev, DEFAULT_LOG_FILTER};
use crate::peer::types::IceCandidate;
use tracing::{trace, warn};
use tracing_subscriber::{fmt::time::ChronoLocal, EnvFilter};

/// Устанавливает глобальный subscriber с локальным временем до миллисекунд.
/// Повторные вызовы игнорируются.
pub fn init() {
    if !logging_enabled(std::env::var_os("RUST_LOG").is_some()) {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(ChronoLocal::new("%Y-%m-%d %H:%M:%S%.3f".to_string()))
        .with_target(true)
        .try_init();
}

// В релизе логи пишем только по явному RUST_LOG
fn logging_enabled(rust_log_set: bool) -> bool {
    dev::ENABLE_LOGGING || rust_log_set
}

/// Trickle-ICE трассировка кандидата
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    trace!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?} username_fragment={:?}",
        cand.candidate,
        cand.sdp_mid,
        cand.sdp_mline_index,
        cand.username_fragment
    );
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateStats {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates(candidates: &[IceCandidate]) -> CandidateStats {
    let mut stats = CandidateStats::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            stats.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            stats.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            stats.relay += 1;
        }
    }

    tracing::info!(
        "Candidate analysis: {} host, {} srflx, {} relay",
        stats.host,
        stats.srflx,
        stats.relay
    );

    if stats.relay == 0 {
        warn!("No TURN relay candidates found! Connection through NAT may fail.");
    }

    stats
}
