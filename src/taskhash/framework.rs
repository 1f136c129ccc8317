// src/taskhash/framework.rs

//! Framework inference.
//!
//! Build-time frameworks read environment variables matching well-known
//! prefixes (`NEXT_PUBLIC_*`, `VITE_*`, …). When inference is enabled and a
//! package's manifest declares the framework, the matching variable names
//! are merged into the task's hashed env set so that changing
//! `NEXT_PUBLIC_API_URL` invalidates a Next.js build without any pipeline
//! configuration. The framework slug itself is recorded in summaries only.

use crate::workspace::Package;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framework {
    pub slug: &'static str,
    /// Manifest dependency whose presence identifies the framework.
    dependency: &'static str,
    /// Env wildcard contributed to the hash.
    pub env_wildcard: &'static str,
}

/// Detection order matters: more specific frameworks first, since e.g. a
/// SvelteKit app also depends on vite.
const FRAMEWORKS: &[Framework] = &[
    Framework {
        slug: "nextjs",
        dependency: "next",
        env_wildcard: "NEXT_PUBLIC_*",
    },
    Framework {
        slug: "gatsby",
        dependency: "gatsby",
        env_wildcard: "GATSBY_*",
    },
    Framework {
        slug: "astro",
        dependency: "astro",
        env_wildcard: "PUBLIC_*",
    },
    Framework {
        slug: "solidstart",
        dependency: "solid-start",
        env_wildcard: "VITE_*",
    },
    Framework {
        slug: "sveltekit",
        dependency: "@sveltejs/kit",
        env_wildcard: "VITE_*",
    },
    Framework {
        slug: "nuxtjs",
        dependency: "nuxt",
        env_wildcard: "NUXT_ENV_*",
    },
    Framework {
        slug: "create-react-app",
        dependency: "react-scripts",
        env_wildcard: "REACT_APP_*",
    },
    Framework {
        slug: "vue-cli",
        dependency: "@vue/cli-service",
        env_wildcard: "VUE_APP_*",
    },
    Framework {
        slug: "vite",
        dependency: "vite",
        env_wildcard: "VITE_*",
    },
];

/// Identify the framework a package builds with, if any.
pub fn infer(package: &Package) -> Option<&'static Framework> {
    FRAMEWORKS
        .iter()
        .find(|framework| package.manifest_dependencies.iter().any(|d| d == framework.dependency))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paths::AnchoredPath;

    fn package_with_deps(deps: &[&str]) -> Package {
        Package {
            name: "web".to_string(),
            dir: AnchoredPath::new("apps/web").unwrap(),
            scripts: Default::default(),
            dependencies: Vec::new(),
            manifest_dependencies: deps.iter().map(|d| d.to_string()).collect(),
            external_deps_hash: String::new(),
        }
    }

    #[test]
    fn detects_next_before_vite() {
        let package = package_with_deps(&["next", "vite", "react"]);
        assert_eq!(infer(&package).unwrap().slug, "nextjs");
    }

    #[test]
    fn no_framework_for_plain_packages() {
        let package = package_with_deps(&["lodash"]);
        assert!(infer(&package).is_none());
    }
}
