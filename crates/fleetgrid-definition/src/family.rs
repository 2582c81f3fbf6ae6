//! Family naming and template → definition conversion.

use fleetgrid_core::{ContainerSpec, DefinitionSpec, EnvVar, LaunchProfile, TaskTemplate};

/// Environment variable carrying a template's JVM options.
pub const JVM_OPTIONS_VAR: &str = "JAVA_OPTS";

/// Definition family for a template: the cloud name with all whitespace
/// removed, a hyphen, then the template name.
pub fn family_name(cloud: &str, template: &str) -> String {
    let cloud: String = cloud.split_whitespace().collect();
    format!("{cloud}-{template}")
}

/// The container a template runs as. The container is named after the family.
pub fn build_container(family: &str, template: &TaskTemplate) -> ContainerSpec {
    let mut environment = template.environment.clone();
    if let Some(jvm_args) = &template.jvm_args {
        environment.push(EnvVar::new(JVM_OPTIONS_VAR, jvm_args.clone()));
    }

    ContainerSpec {
        name: family.to_string(),
        image: template.image.clone(),
        cpu: template.cpu,
        memory: template.memory.filter(|m| *m > 0),
        memory_reservation: template.memory_reservation.filter(|m| *m > 0),
        environment,
        mount_points: template.mount_points.clone(),
        extra_hosts: template.extra_hosts.clone(),
        entrypoint: template
            .entrypoint
            .as_deref()
            .map(|e| e.split_whitespace().map(str::to_string).collect()),
        privileged: template.privileged,
        essential: true,
        log_config: template.log_config.clone(),
    }
}

/// Everything published for a template under a launch profile.
pub fn build_definition(
    family: &str,
    template: &TaskTemplate,
    profile: &LaunchProfile,
) -> DefinitionSpec {
    DefinitionSpec {
        family: family.to_string(),
        container: build_container(family, template),
        volumes: template.volumes.clone(),
        task_role: template.task_role.clone(),
        execution_role: template.execution_role.clone(),
        compatibilities: vec![profile.compatibility()],
        sizing: profile.sizing(),
        network_mode: profile.network_mode(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_core::{Compatibility, HostedLaunch, NetworkMode};

    fn template() -> TaskTemplate {
        TaskTemplate {
            template_name: "java".to_string(),
            label: "java".to_string(),
            image: "ci/agent:latest".to_string(),
            cpu: 512,
            memory: Some(1024),
            memory_reservation: Some(0),
            environment: vec![EnvVar::new("A", "1")],
            mount_points: Vec::new(),
            extra_hosts: Vec::new(),
            volumes: Vec::new(),
            entrypoint: Some("/usr/bin/agent  --verbose".to_string()),
            jvm_args: Some("-Xmx512m".to_string()),
            privileged: true,
            log_config: None,
            task_role: None,
            execution_role: None,
        }
    }

    #[test]
    fn family_strips_whitespace() {
        assert_eq!(family_name("ci builders", "java"), "cibuilders-java");
        assert_eq!(family_name(" ci\tpool ", "node"), "cipool-node");
        assert_eq!(family_name("ci", "java"), "ci-java");
    }

    #[test]
    fn container_from_template() {
        let c = build_container("ci-java", &template());
        assert_eq!(c.name, "ci-java");
        assert_eq!(c.memory_reservation, None);
        assert_eq!(
            c.entrypoint,
            Some(vec!["/usr/bin/agent".to_string(), "--verbose".to_string()])
        );
        assert!(c.environment.contains(&EnvVar::new(JVM_OPTIONS_VAR, "-Xmx512m")));
        assert!(c.essential);
        assert!(c.privileged);
    }

    #[test]
    fn hosted_definition_carries_sizing() {
        let profile = LaunchProfile::Hosted(HostedLaunch {
            cpu: 512,
            memory: 1024,
            subnets: vec!["subnet-1".to_string()],
            security_groups: Vec::new(),
            assign_public_ip: false,
        });
        let def = build_definition("ci-java", &template(), &profile);
        assert_eq!(def.compatibilities, vec![Compatibility::Hosted]);
        assert_eq!(def.network_mode, Some(NetworkMode::Vpc));
        assert_eq!(def.sizing.map(|s| (s.cpu, s.memory)), Some((512, 1024)));

        let def = build_definition("ci-java", &template(), &LaunchProfile::SelfManaged);
        assert_eq!(def.compatibilities, vec![Compatibility::SelfManaged]);
        assert_eq!(def.sizing, None);
        assert_eq!(def.network_mode, None);
    }
}
