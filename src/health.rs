use crate::state::{HealthState, Resources, ServiceStatuses};

const CRITICAL_PERCENT: f64 = 95.0;
const HEALTHY_CEILING_PERCENT: f64 = 90.0;

/// Classifies a freshly sampled host. Rules are checked in order and the
/// first match wins; the 90..=95 band is deliberately `Warning`.
pub fn classify(
    resources: &Resources,
    services: &ServiceStatuses,
    critical_services: &[String],
) -> HealthState {
    let cpu = resources.cpu_percent;
    let memory = resources.memory_percent;

    if !cpu.is_finite() || !memory.is_finite() || !resources.load_average.is_finite() {
        return HealthState::Error;
    }

    if cpu > CRITICAL_PERCENT || memory > CRITICAL_PERCENT {
        return HealthState::Critical;
    }

    let critical_active = critical_services.iter().all(|name| {
        services
            .get(name)
            .map(|state| state.is_active())
            .unwrap_or(false)
    });

    if critical_active && cpu < HEALTHY_CEILING_PERCENT && memory < HEALTHY_CEILING_PERCENT {
        HealthState::Healthy
    } else {
        HealthState::Warning
    }
}
