use glam::Vec3;
use tracing::warn;

/// Where the camera starts inside the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnPoint {
    /// Entrance used by the main tour
    Primary,
    /// Entrance further along the west wing
    Alternate,
}

impl SpawnPoint {
    pub fn position(self) -> Vec3 {
        match self {
            SpawnPoint::Primary => Vec3::new(-28.459_318, 1.374_356_4, -44.543_29),
            SpawnPoint::Alternate => Vec3::new(-40.550_472, 1.374_356_4, -36.830_544),
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "primary" | "a" | "1" => Some(SpawnPoint::Primary),
            "alternate" | "b" | "2" => Some(SpawnPoint::Alternate),
            _ => None,
        }
    }
}

/// What a single-finger drag on the render surface does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceDrag {
    /// Rotate the camera
    Look,
    /// Press the direction keys from the drag direction
    Move,
    /// Both of the above
    LookAndMove,
}

impl SurfaceDrag {
    pub fn looks(self) -> bool {
        matches!(self, SurfaceDrag::Look | SurfaceDrag::LookAndMove)
    }

    pub fn moves(self) -> bool {
        matches!(self, SurfaceDrag::Move | SurfaceDrag::LookAndMove)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "look" => Some(SurfaceDrag::Look),
            "move" => Some(SurfaceDrag::Move),
            "both" | "look+move" => Some(SurfaceDrag::LookAndMove),
            _ => None,
        }
    }
}

/// Runtime settings for a walkthrough session
#[derive(Debug, Clone, PartialEq)]
pub struct WalkConfig {
    /// Folder name under `models/`
    pub object_id: String,
    pub spawn: SpawnPoint,
    /// Units per frame
    pub move_speed: f32,
    /// Units per frame while sprint is held
    pub sprint_speed: f32,
    pub collision_enabled: bool,
    /// Hits nearer than this block the step
    pub collision_distance: f32,
    /// Radians per pixel of pointer or touch movement
    pub look_sensitivity: f32,
    /// Vertical field of view in degrees
    pub fov_y_deg: f32,
    pub surface_drag: SurfaceDrag,
}

impl Default for WalkConfig {
    fn default() -> Self {
        Self {
            object_id: "u".to_string(),
            spawn: SpawnPoint::Primary,
            move_speed: 0.5,
            sprint_speed: 1.5,
            collision_enabled: true,
            collision_distance: 1.5,
            look_sensitivity: 0.002,
            fov_y_deg: 75.0,
            surface_drag: SurfaceDrag::Look,
        }
    }
}

impl WalkConfig {
    /// Relative path of the scene description to load
    pub fn model_path(&self) -> String {
        crate::model::loader::model_path(&self.object_id)
    }

    /// The "u" model is lit darker than the others and needs a stronger ambient term.
    pub fn ambient_intensity(&self) -> f32 {
        if self.object_id == "u" { 5.0 } else { 1.0 }
    }

    /// Apply `key=value` overrides. Unknown keys and unparsable values are logged and skipped.
    pub fn apply_overrides<'a, I>(&mut self, pairs: I)
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        for (key, value) in pairs {
            let value = value.trim();
            let applied = match key.trim().to_ascii_lowercase().as_str() {
                "object" => {
                    let ok = !value.is_empty()
                        && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
                    if ok {
                        self.object_id = value.to_string();
                    }
                    ok
                }
                "spawn" => SpawnPoint::parse(value).map(|s| self.spawn = s).is_some(),
                "speed" => parse_positive(value).map(|v| self.move_speed = v).is_some(),
                "sprint" => parse_positive(value).map(|v| self.sprint_speed = v).is_some(),
                "collision" => parse_switch(value).map(|v| self.collision_enabled = v).is_some(),
                "collision_distance" => parse_positive(value).map(|v| self.collision_distance = v).is_some(),
                "sensitivity" => parse_positive(value).map(|v| self.look_sensitivity = v).is_some(),
                "fov" => value
                    .parse::<f32>()
                    .ok()
                    .filter(|v| (10.0..=150.0).contains(v))
                    .map(|v| self.fov_y_deg = v)
                    .is_some(),
                "drag" => SurfaceDrag::parse(value).map(|d| self.surface_drag = d).is_some(),
                _ => {
                    warn!(key, "unknown config key");
                    continue;
                }
            };
            if !applied {
                warn!(key, value, "ignoring invalid config value");
            }
        }
    }

    /// Parse a URL query string such as `?spawn=alternate&drag=move`.
    /// Keys and values are percent-decoded; `+` stands for a space.
    pub fn apply_query(&mut self, query: &str) {
        let query = query.trim_start_matches('?');
        let mut pairs = Vec::new();
        for part in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = part.split_once('=').unwrap_or((part, ""));
            match (decode_query_component(key), decode_query_component(value)) {
                (Some(key), Some(value)) => pairs.push((key, value)),
                _ => warn!(part, "ignoring undecodable query parameter"),
            }
        }
        self.apply_overrides(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    }

    /// Read `WALK_OBJECT`, `WALK_SPAWN`, `WALK_COLLISION`, ... from the environment.
    #[cfg(not(target_arch = "wasm32"))]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        let vars: Vec<(String, String)> = std::env::vars()
            .filter_map(|(k, v)| k.strip_prefix("WALK_").map(|k| (k.to_ascii_lowercase(), v)))
            .collect();
        config.apply_overrides(vars.iter().map(|(k, v)| (k.as_str(), v.as_str())));
        config
    }
}

fn decode_query_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " ")).ok().map(|s| s.into_owned())
}

fn parse_positive(value: &str) -> Option<f32> {
    value.parse::<f32>().ok().filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_switch(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_tour() {
        let config = WalkConfig::default();
        assert_eq!(config.model_path(), "models/u/scene.gltf");
        assert_eq!(config.move_speed, 0.5);
        assert_eq!(config.sprint_speed, 1.5);
        assert_eq!(config.collision_distance, 1.5);
        assert!(config.collision_enabled);
        assert_eq!(config.ambient_intensity(), 5.0);
    }

    #[test]
    fn test_query_overrides() {
        let mut config = WalkConfig::default();
        config.apply_query("?spawn=alternate&collision=off&drag=move&object=house");
        assert_eq!(config.spawn, SpawnPoint::Alternate);
        assert!(!config.collision_enabled);
        assert_eq!(config.surface_drag, SurfaceDrag::Move);
        assert_eq!(config.model_path(), "models/house/scene.gltf");
        assert_eq!(config.ambient_intensity(), 1.0);
    }

    #[test]
    fn test_query_values_are_percent_decoded() {
        let mut config = WalkConfig::default();
        config.apply_query("?object=my%2Dhouse&spawn=%61lternate&fov=+90");
        assert_eq!(config.object_id, "my-house");
        assert_eq!(config.spawn, SpawnPoint::Alternate);
        assert_eq!(config.fov_y_deg, 90.0, "a leading + decodes to a trimmed space");

        // Invalid UTF-8 after decoding is skipped, not applied raw
        config.apply_query("object=%FF%FE");
        assert_eq!(config.object_id, "my-house");
    }

    #[test]
    fn test_invalid_values_are_ignored() {
        let mut config = WalkConfig::default();
        config.apply_overrides([
            ("speed", "-3"),
            ("fov", "400"),
            ("object", "../etc"),
            ("spawn", "nowhere"),
            ("bogus", "1"),
        ]);
        assert_eq!(config, WalkConfig::default(), "bad overrides must leave defaults untouched");
    }

    #[test]
    fn test_spawn_points_differ_only_horizontally() {
        let a = SpawnPoint::Primary.position();
        let b = SpawnPoint::Alternate.position();
        assert_eq!(a.y, b.y);
        assert!(a.distance(b) > 1.0);
    }
}
