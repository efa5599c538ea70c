/// Process-wide identity attached to every published value.
///
/// Each dimension is optional.  Wire-format publishers join the non-blank dimensions, in the order
/// environment, application, region, cluster, hostname, into a dotted name prefix.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct Tags {
    env: Option<String>,
    app_name: Option<String>,
    region: Option<String>,
    cluster: Option<String>,
    hostname: Option<String>,
}

impl Tags {
    /// Creates an empty set of tags.
    pub fn new() -> Tags {
        Tags::default()
    }

    /// Sets the environment.
    pub fn with_env<S: Into<String>>(mut self, env: S) -> Self {
        self.env = Some(env.into());
        self
    }

    /// Sets the application name.
    pub fn with_app_name<S: Into<String>>(mut self, app_name: S) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    /// Sets the region.
    pub fn with_region<S: Into<String>>(mut self, region: S) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Sets the cluster.
    pub fn with_cluster<S: Into<String>>(mut self, cluster: S) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Sets the hostname.
    pub fn with_hostname<S: Into<String>>(mut self, hostname: S) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    /// Gets the environment, if set.
    pub fn env(&self) -> Option<&str> {
        self.env.as_deref()
    }

    /// Gets the application name, if set.
    pub fn app_name(&self) -> Option<&str> {
        self.app_name.as_deref()
    }

    /// Gets the region, if set.
    pub fn region(&self) -> Option<&str> {
        self.region.as_deref()
    }

    /// Gets the cluster, if set.
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Gets the hostname, if set.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Iterates over the non-blank dimensions in prefix order.
    pub fn values(&self) -> impl Iterator<Item = &str> {
        [&self.env, &self.app_name, &self.region, &self.cluster, &self.hostname]
            .into_iter()
            .filter_map(|value| value.as_deref())
            .filter(|value| !value.trim().is_empty())
    }

    /// Joins the non-blank dimensions with `delimiter`.
    pub fn prefix(&self, delimiter: char) -> String {
        let mut out = String::new();
        for value in self.values() {
            if !out.is_empty() {
                out.push(delimiter);
            }
            out.push_str(value);
        }
        out
    }
}
