use sluice_core::Algorithm;

pub(crate) fn record_check(enabled: bool, algorithm: Algorithm, allowed: bool) {
    if !enabled {
        return;
    }
    let outcome = if allowed { "allowed" } else { "denied" };
    metrics::counter!(
        "sluice_checks_total",
        "algorithm" => algorithm.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_store_error(enabled: bool) {
    if enabled {
        metrics::counter!("sluice_store_errors_total").increment(1);
    }
}

pub(crate) fn record_reset(enabled: bool) {
    if enabled {
        metrics::counter!("sluice_resets_total").increment(1);
    }
}
