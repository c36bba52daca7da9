use anyhow::{bail, Result};

#[derive(Clone, Debug, clap::Parser)]
pub struct Config {
    /// Frames a trajectory may go unseen before it is closed. Also the frame
    /// buffer length and the minimum duration of a persisted trajectory.
    #[clap(long, default_value = "5")]
    pub max_occlusions: usize,

    /// Radius in pixels within which a detection can claim a prediction.
    #[clap(long, default_value = "4.0")]
    pub search_radius: f64,

    /// Squared pixel distance below which the last node is replaced.
    #[clap(long, default_value = "2.0")]
    pub static_threshold: f64,

    #[clap(long, default_value = "200")]
    pub max_points: usize,

    #[clap(long, default_value = "0.01")]
    pub quality_level: f64,

    #[clap(long, default_value = "4.0")]
    pub min_distance: f64,

    #[clap(long, default_value = "3")]
    pub lk_levels: usize,

    #[clap(long, default_value = "9")]
    pub lk_win_size: usize,

    #[clap(long, default_value = "10")]
    pub lk_iters: usize,

    #[clap(long, default_value = "0.1")]
    pub lk_term: f64,

    #[clap(long, default_value = "1e-4")]
    pub lk_min_eig: f64,

    /// Stop after this many frames.
    #[clap(long, default_value = "1000")]
    pub max_frames: usize,

    /// Consecutive unreadable frames tolerated before giving up.
    #[clap(long, default_value = "10")]
    pub max_read_failures: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_occlusions: 5,
            search_radius: 4.0,
            static_threshold: 2.0,
            max_points: 200,
            quality_level: 0.01,
            min_distance: 4.0,
            lk_levels: 3,
            lk_win_size: 9,
            lk_iters: 10,
            lk_term: 0.1,
            lk_min_eig: 1e-4,
            max_frames: 1000,
            max_read_failures: 10,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.max_occlusions == 0 {
            bail!("max_occlusions must be at least 1");
        }
        if !(self.search_radius > 0.) {
            bail!("search_radius must be positive, got {}", self.search_radius);
        }
        if self.lk_win_size == 0 || self.lk_win_size % 2 == 0 {
            bail!("lk_win_size must be odd, got {}", self.lk_win_size);
        }
        if !(0. ..=1.).contains(&self.quality_level) {
            bail!("quality_level must lie in [0, 1], got {}", self.quality_level);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_cli_defaults_match_default() {
        let parsed = Config::parse_from(["point-trajectories"]);
        let default = Config::default();
        assert_eq!(parsed.max_occlusions, default.max_occlusions);
        assert_eq!(parsed.search_radius, default.search_radius);
        assert_eq!(parsed.static_threshold, default.static_threshold);
        assert_eq!(parsed.max_points, default.max_points);
        assert_eq!(parsed.lk_win_size, default.lk_win_size);
        assert_eq!(parsed.lk_min_eig, default.lk_min_eig);
        assert_eq!(parsed.max_frames, default.max_frames);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        config.max_occlusions = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.lk_win_size = 8;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.search_radius = 0.;
        assert!(config.validate().is_err());
    }
}
