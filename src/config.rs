use std::time::Duration;

/// Late-join protocol configuration
#[derive(Debug, Clone)]
pub struct LateJoinConfig {
    /// Host tick rate driving every wait
    pub tick_rate_hz: u32,
    /// How long to wait for the joiner's avatar to appear
    pub entity_timeout: Duration,
    /// How long to wait for the avatar's data block to replicate
    pub data_timeout: Duration,
    /// Grace period for the host's own join sync before touching shared state
    pub settle_delay: Duration,
    /// Extra grace before snapshotting peers
    pub selection_delay: Duration,
    /// Wait after the warp command before forcing the local position
    pub replication_grace: Duration,
    /// Wait after the local correction before physics authority is restored
    pub restore_grace: Duration,
    /// Horizontal distance of lateral arrival candidates from the target
    pub lateral_offset: f32,
    /// Allowed ground height difference between a candidate and the target
    pub ground_tolerance: f32,
    /// Height above the target's ground that probes start from
    pub probe_height: f32,
    /// Maximum probe length
    pub probe_distance: f32,
    /// Height above the target used when no lateral candidate is valid
    pub fallback_height: f32,
    /// Lift above probed ground so the avatar does not spawn inside it
    pub arrival_clearance: f32,
    /// Disable joiner/target collision while warping
    pub suppress_collision: bool,
    /// Stages where late joins are left to the lobby's own spawning
    pub lobby_stages: Vec<String>,
    /// Port for the Prometheus endpoint
    pub metrics_port: u16,
}

impl Default for LateJoinConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 30,
            entity_timeout: Duration::from_secs(10),
            data_timeout: Duration::from_secs(10),
            settle_delay: Duration::from_millis(1500),
            selection_delay: Duration::from_millis(500),
            replication_grace: Duration::from_millis(500),
            restore_grace: Duration::from_millis(200),
            lateral_offset: 1.5,
            ground_tolerance: 0.75,
            probe_height: 3.0,
            probe_distance: 10.0,
            fallback_height: 2.0,
            arrival_clearance: 0.1,
            suppress_collision: true,
            lobby_stages: vec!["Airport".to_string()],
            metrics_port: 9090,
        }
    }
}

impl LateJoinConfig {
    /// Load config from environment or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::default();

        if let Ok(rate) = std::env::var("TICK_RATE_HZ") {
            match rate.parse::<u32>() {
                Ok(parsed) if parsed > 0 && parsed <= 240 => config.tick_rate_hz = parsed,
                Ok(_) => tracing::warn!("TICK_RATE_HZ must be 1-240, using default"),
                Err(_) => tracing::warn!("Invalid TICK_RATE_HZ '{}', using default", rate),
            }
        }

        read_millis("ENTITY_TIMEOUT_MS", &mut config.entity_timeout);
        read_millis("DATA_TIMEOUT_MS", &mut config.data_timeout);
        read_millis("SETTLE_DELAY_MS", &mut config.settle_delay);
        read_millis("SELECTION_DELAY_MS", &mut config.selection_delay);
        read_millis("REPLICATION_GRACE_MS", &mut config.replication_grace);
        read_millis("RESTORE_GRACE_MS", &mut config.restore_grace);

        read_distance("LATERAL_OFFSET", &mut config.lateral_offset);
        read_distance("GROUND_TOLERANCE", &mut config.ground_tolerance);
        read_distance("PROBE_HEIGHT", &mut config.probe_height);
        read_distance("PROBE_DISTANCE", &mut config.probe_distance);
        read_distance("FALLBACK_HEIGHT", &mut config.fallback_height);

        if let Ok(flag) = std::env::var("SUPPRESS_COLLISION") {
            match flag.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => config.suppress_collision = true,
                "0" | "false" | "no" => config.suppress_collision = false,
                _ => tracing::warn!("Invalid SUPPRESS_COLLISION '{}', using default", flag),
            }
        }

        if let Ok(stages) = std::env::var("LOBBY_STAGES") {
            config.lobby_stages = stages
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(port) = std::env::var("METRICS_PORT") {
            match port.parse::<u16>() {
                Ok(parsed) if parsed > 0 => config.metrics_port = parsed,
                Ok(_) => tracing::warn!("METRICS_PORT must be > 0, using default"),
                Err(_) => tracing::warn!("Invalid METRICS_PORT '{}', using default", port),
            }
        }

        config
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        if self.tick_rate_hz == 0 {
            return Err("tick_rate_hz must be at least 1".to_string());
        }
        if self.entity_timeout.is_zero() {
            return Err("entity_timeout cannot be 0".to_string());
        }
        if self.data_timeout.is_zero() {
            return Err("data_timeout cannot be 0".to_string());
        }
        if self.ground_tolerance < 0.0 {
            return Err("ground_tolerance cannot be negative".to_string());
        }
        if self.probe_distance <= self.probe_height {
            return Err("probe_distance must exceed probe_height".to_string());
        }
        Ok(())
    }

    /// Duration of one host tick
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate_hz.max(1)
    }

    /// Whether late joins are handled on this stage
    pub fn is_lobby_stage(&self, stage: &str) -> bool {
        self.lobby_stages.iter().any(|s| s == stage)
    }
}

fn read_millis(var: &str, target: &mut Duration) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<u64>() {
            Ok(ms) if ms <= 600_000 => *target = Duration::from_millis(ms),
            Ok(_) => tracing::warn!("{} must be at most 600000, using default", var),
            Err(_) => tracing::warn!("Invalid {} '{}', using default", var, value),
        }
    }
}

fn read_distance(var: &str, target: &mut f32) {
    if let Ok(value) = std::env::var(var) {
        match value.parse::<f32>() {
            Ok(parsed) if parsed.is_finite() && parsed >= 0.0 => *target = parsed,
            _ => tracing::warn!("Invalid {} '{}', using default", var, value),
        }
    }
}
