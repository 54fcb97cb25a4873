//! Conversion of Kubernetes pod objects into [`PodStatus`]

use crate::models::{
    ContainerProbes, ContainerStateDetail, ContainerStatus, PodCondition, PodStatus, ProbeStatus,
};
use k8s_openapi::api::core::v1::{self as corev1, Pod, Probe};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

/// Build the status view of a pod, including probe configuration per container
pub fn pod_status_from(pod: &Pod) -> PodStatus {
    let status = pod.status.clone().unwrap_or_default();
    let container_statuses: Vec<ContainerStatus> = status
        .container_statuses
        .unwrap_or_default()
        .iter()
        .map(container_status_from)
        .collect();

    let conditions = status
        .conditions
        .unwrap_or_default()
        .into_iter()
        .map(|c| PodCondition {
            condition_type: c.type_,
            status: c.status,
            reason: c.reason,
            message: c.message,
            last_transition_time: c.last_transition_time.map(|t| t.0.to_rfc3339()),
        })
        .collect();

    let probe_results = pod
        .spec
        .as_ref()
        .map(|spec| {
            spec.containers
                .iter()
                .map(|container| probes_for(container, &container_statuses, pod))
                .collect()
        })
        .unwrap_or_default();

    PodStatus {
        name: pod.metadata.name.clone().unwrap_or_default(),
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        phase: status.phase.unwrap_or_else(|| "Unknown".to_string()),
        conditions,
        container_statuses,
        start_time: status.start_time.map(|t| t.0.to_rfc3339()),
        pod_ip: status.pod_ip,
        host_ip: status.host_ip,
        probe_results,
    }
}

fn container_status_from(cs: &corev1::ContainerStatus) -> ContainerStatus {
    let state = cs.state.clone().unwrap_or_default();
    ContainerStatus {
        name: cs.name.clone(),
        ready: cs.ready,
        restart_count: cs.restart_count,
        image: cs.image.clone(),
        started: cs.started.unwrap_or(false),
        waiting: state.waiting.map(|w| ContainerStateDetail {
            reason: w.reason,
            message: w.message,
            exit_code: None,
        }),
        terminated: state.terminated.map(|t| ContainerStateDetail {
            reason: t.reason,
            message: t.message,
            exit_code: Some(t.exit_code),
        }),
    }
}

fn probes_for(
    container: &corev1::Container,
    statuses: &[ContainerStatus],
    pod: &Pod,
) -> ContainerProbes {
    let mut probes = ContainerProbes {
        container_name: container.name.clone(),
        liveness: None,
        readiness: None,
    };

    let Some(status) = statuses.iter().find(|s| s.name == container.name) else {
        return probes;
    };

    // last termination carries the liveness failure message
    let last_terminated = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .and_then(|all| all.iter().find(|s| s.name == container.name))
        .and_then(|s| s.last_state.as_ref())
        .and_then(|s| s.terminated.as_ref());

    if let Some(probe) = &container.liveness_probe {
        let mut liveness = ProbeStatus {
            status: status.ready,
            success_threshold: probe.success_threshold.unwrap_or(1),
            failure_count: probe.failure_threshold.unwrap_or(3),
            details: format_probe_details(probe),
            failure: None,
            last_probe_time: None,
        };
        if let Some(terminated) = last_terminated {
            liveness.failure = terminated.message.clone();
            liveness.last_probe_time = terminated.finished_at.as_ref().map(|t| t.0.to_rfc3339());
        }
        if status.restart_count > 0 {
            liveness.failure_count = status.restart_count;
        }
        probes.liveness = Some(liveness);
    }

    if let Some(probe) = &container.readiness_probe {
        probes.readiness = Some(ProbeStatus {
            status: status.ready,
            success_threshold: probe.success_threshold.unwrap_or(1),
            failure_count: probe.failure_threshold.unwrap_or(3),
            details: format_probe_details(probe),
            failure: None,
            last_probe_time: None,
        });
    }

    probes
}

/// Describe a probe handler and its timing, e.g. `http-get :8080/healthz delay=5s timeout=1s period=10s`
pub fn format_probe_details(probe: &Probe) -> String {
    let handler = if let Some(exec) = &probe.exec {
        format!("exec {:?}", exec.command.clone().unwrap_or_default())
    } else if let Some(http) = &probe.http_get {
        format!(
            "http-get {}:{}{}",
            http.host.clone().unwrap_or_default(),
            port_string(&http.port),
            http.path.clone().unwrap_or_default()
        )
    } else if let Some(tcp) = &probe.tcp_socket {
        format!("tcp-socket {}", port_string(&tcp.port))
    } else if let Some(grpc) = &probe.grpc {
        format!("grpc {}", grpc.port)
    } else {
        String::new()
    };

    format!(
        "{} delay={}s timeout={}s period={}s",
        handler,
        probe.initial_delay_seconds.unwrap_or(0),
        probe.timeout_seconds.unwrap_or(1),
        probe.period_seconds.unwrap_or(10)
    )
    .trim_start()
    .to_string()
}

fn port_string(port: &IntOrString) -> String {
    match port {
        IntOrString::Int(p) => p.to_string(),
        IntOrString::String(s) => s.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::HTTPGetAction;

    fn sample_pod() -> Pod {
        serde_json::from_value(serde_json::json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "web-1", "namespace": "default" },
            "spec": {
                "containers": [{
                    "name": "app",
                    "image": "nginx:1.25",
                    "readinessProbe": {
                        "httpGet": { "path": "/healthz", "port": 8080 },
                        "periodSeconds": 5
                    }
                }]
            },
            "status": {
                "phase": "Running",
                "podIP": "10.0.0.7",
                "conditions": [{ "type": "Ready", "status": "True" }],
                "containerStatuses": [{
                    "name": "app",
                    "ready": true,
                    "restartCount": 0,
                    "image": "nginx:1.25",
                    "imageID": "",
                    "state": { "running": {} }
                }]
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_pod_status_from_running_pod() {
        let status = pod_status_from(&sample_pod());

        assert_eq!(status.name, "web-1");
        assert_eq!(status.phase, "Running");
        assert_eq!(status.pod_ip.as_deref(), Some("10.0.0.7"));
        assert!(status.is_ready());
        assert_eq!(status.conditions[0].condition_type, "Ready");

        let probes = &status.probe_results[0];
        assert!(probes.liveness.is_none());
        let readiness = probes.readiness.as_ref().unwrap();
        assert!(readiness.status);
        assert!(readiness.details.contains("http-get :8080/healthz"));
        assert!(readiness.details.contains("period=5s"));
    }

    #[test]
    fn test_pod_status_without_status_is_unknown() {
        let mut pod = sample_pod();
        pod.status = None;
        let status = pod_status_from(&pod);
        assert_eq!(status.phase, "Unknown");
        assert!(status.container_statuses.is_empty());
    }

    #[test]
    fn test_format_probe_details_defaults() {
        let probe = Probe {
            http_get: Some(HTTPGetAction {
                path: Some("/ready".to_string()),
                port: IntOrString::String("http".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            format_probe_details(&probe),
            "http-get :http/ready delay=0s timeout=1s period=10s"
        );
    }
}
