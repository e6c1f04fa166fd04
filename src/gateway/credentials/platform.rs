//! Kubernetes platform detection.
//!
//! Probed once at startup and cached on the engine; the result steers which
//! workload-identity exchange the credential strategies attempt first.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Eks,
    Aks,
    Gke,
    Oke,
    Iks,
    GenericK8s,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eks => "eks",
            Self::Aks => "aks",
            Self::Gke => "gke",
            Self::Oke => "oke",
            Self::Iks => "iks",
            Self::GenericK8s => "generic-k8s",
        }
    }

    pub fn detect() -> Self {
        Self::detect_with(|name| std::env::var(name).ok())
    }

    /// Probe order is fixed: the first cloud whose identity markers are
    /// present wins.
    pub fn detect_with<F>(env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let set = |name: &str| env(name).filter(|value| !value.is_empty()).is_some();

        if set("AWS_WEB_IDENTITY_TOKEN_FILE") && set("AWS_ROLE_ARN") {
            return Self::Eks;
        }
        if set("AZURE_FEDERATED_TOKEN_FILE") && set("AZURE_CLIENT_ID") {
            return Self::Aks;
        }
        if set("GOOGLE_APPLICATION_CREDENTIALS") || set("GCE_METADATA_HOST") {
            return Self::Gke;
        }
        if set("OCI_RESOURCE_PRINCIPAL_VERSION") {
            return Self::Oke;
        }
        if set("IBM_CR_TOKEN_FILE") || set("IKS_CLUSTER_ID") {
            return Self::Iks;
        }
        Self::GenericK8s
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn detect(vars: &[(&str, &str)]) -> Platform {
        let map: HashMap<&str, &str> = vars.iter().copied().collect();
        Platform::detect_with(|name| map.get(name).map(|value| value.to_string()))
    }

    #[test]
    fn probes_in_declared_order() {
        assert_eq!(
            detect(&[
                ("AWS_WEB_IDENTITY_TOKEN_FILE", "/var/run/token"),
                ("AWS_ROLE_ARN", "arn:aws:iam::1:role/x"),
                ("AZURE_FEDERATED_TOKEN_FILE", "/var/run/azure"),
                ("AZURE_CLIENT_ID", "c"),
            ]),
            Platform::Eks
        );
        assert_eq!(
            detect(&[
                ("AZURE_FEDERATED_TOKEN_FILE", "/var/run/azure"),
                ("AZURE_CLIENT_ID", "c"),
            ]),
            Platform::Aks
        );
        assert_eq!(
            detect(&[("GOOGLE_APPLICATION_CREDENTIALS", "/etc/sa.json")]),
            Platform::Gke
        );
        assert_eq!(detect(&[("OCI_RESOURCE_PRINCIPAL_VERSION", "2.2")]), Platform::Oke);
        assert_eq!(detect(&[("IKS_CLUSTER_ID", "c")]), Platform::Iks);
        assert_eq!(detect(&[]), Platform::GenericK8s);
    }

    #[test]
    fn partial_aws_markers_do_not_count() {
        assert_eq!(
            detect(&[("AWS_WEB_IDENTITY_TOKEN_FILE", "/var/run/token")]),
            Platform::GenericK8s
        );
        assert_eq!(detect(&[("AWS_ROLE_ARN", "")]), Platform::GenericK8s);
    }
}
