/// The API resources. Paths are matched exactly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    Configurations,
    ConfigGroups,
    GroupConfigurations,
}

impl Route {
    pub fn from_path(path: &str) -> Option<Route> {
        match path.strip_suffix('/').unwrap_or(path) {
            "/configurations" => Some(Route::Configurations),
            "/configgroups" => Some(Route::ConfigGroups),
            "/configgroups/configurations" => Some(Route::GroupConfigurations),
            _ => None,
        }
    }

    /// Bounded label for metrics.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Route::Configurations => "/configurations",
            Route::ConfigGroups => "/configgroups",
            Route::GroupConfigurations => "/configgroups/configurations",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path() {
        assert_eq!(
            Route::from_path("/configurations"),
            Some(Route::Configurations)
        );
        assert_eq!(Route::from_path("/configgroups/"), Some(Route::ConfigGroups));
        assert_eq!(
            Route::from_path("/configgroups/configurations"),
            Some(Route::GroupConfigurations)
        );
        assert_eq!(Route::from_path("/configurations/svc"), None);
        assert_eq!(Route::from_path("/"), None);
        assert_eq!(Route::GroupConfigurations.as_str(), "/configgroups/configurations");
    }
}
