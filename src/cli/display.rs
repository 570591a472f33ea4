//! Display formatting for CLI output
//!
//! Pure functions that format data for display

use crate::cluster::{Node, UtilizationSample};
use crate::metrics::ClusterStats;

// ============================================================================
// Table formatting helpers
// ============================================================================

/// Format a simple table with headers and rows
pub fn format_table(headers: &[&str], rows: Vec<Vec<String>>) -> String {
    if rows.is_empty() {
        return "No resources found.\n".to_string();
    }

    // Calculate column widths
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            if i < widths.len() {
                widths[i] = widths[i].max(cell.len());
            }
        }
    }

    let mut output = String::new();

    for (i, header) in headers.iter().enumerate() {
        if i > 0 {
            output.push_str("   ");
        }
        output.push_str(&format!(
            "{:width$}",
            header.to_uppercase(),
            width = widths[i]
        ));
    }
    output.push('\n');

    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if i > 0 {
                output.push_str("   ");
            }
            if i < widths.len() {
                output.push_str(&format!("{:width$}", cell, width = widths[i]));
            } else {
                output.push_str(cell);
            }
        }
        output.push('\n');
    }

    output
}

// ============================================================================
// Cluster display
// ============================================================================

/// Format the node list
pub fn format_node_list(nodes: &[Node]) -> String {
    let headers = &["node", "status", "type", "group", "cpu", "memory", "pods", "sim"];
    let rows = nodes
        .iter()
        .map(|n| {
            vec![
                n.node_id.clone(),
                n.status.as_str().to_string(),
                n.node_type.as_str().to_string(),
                n.network_group.clone(),
                format!("{}/{}", n.cpu_available, n.cpu_total),
                format!("{}/{}GB", n.memory_available, n.memory_total),
                if n.pods.is_empty() {
                    "-".to_string()
                } else {
                    n.pods
                        .iter()
                        .map(|p| p.pod_id.as_str())
                        .collect::<Vec<_>>()
                        .join(",")
                },
                if n.simulate_heartbeat { "on" } else { "off" }.to_string(),
            ]
        })
        .collect();

    format_table(headers, rows)
}

/// Format cluster statistics
pub fn format_stats(stats: &ClusterStats) -> String {
    format!(
        "Nodes:        {}\nPods:         {}\nUtilization:  {:.2}%\n",
        stats.total_nodes, stats.total_pods, stats.utilization
    )
}

/// Format the event log, one line per entry
pub fn format_logs(logs: &[String]) -> String {
    if logs.is_empty() {
        return "No events.\n".to_string();
    }
    let mut output = logs.join("\n");
    output.push('\n');
    output
}

/// Format the utilization history
pub fn format_history(history: &[UtilizationSample]) -> String {
    let rows = history
        .iter()
        .map(|s| {
            vec![
                s.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                format!("{:.2}%", s.utilization),
            ]
        })
        .collect();
    format_table(&["time", "utilization"], rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{NodeSpec, NodeType, Pod};
    use chrono::Utc;

    #[test]
    fn test_format_table_empty() {
        assert_eq!(format_table(&["a"], vec![]), "No resources found.\n");
    }

    #[test]
    fn test_format_table_aligns_columns() {
        let out = format_table(
            &["name", "cpu"],
            vec![
                vec!["n1".to_string(), "4".to_string()],
                vec!["longer-node".to_string(), "16".to_string()],
            ],
        );
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines[0], "NAME          CPU");
        assert_eq!(lines[1], "n1            4  ");
        assert_eq!(lines[2], "longer-node   16 ");
    }

    #[test]
    fn test_format_node_list() {
        let spec = NodeSpec::new(8, 16).with_type(NodeType::HighCpu);
        let mut node = Node::new("n1", &spec, Utc::now());
        node.place(Pod::new("pod_1", 2, 4, "default"));

        let out = format_node_list(&[node]);
        assert!(out.contains("n1"));
        assert!(out.contains("6/8"));
        assert!(out.contains("12/16GB"));
        assert!(out.contains("pod_1"));
        assert!(out.contains("high_cpu"));
    }

    #[test]
    fn test_format_stats() {
        let stats = ClusterStats {
            total_nodes: 2,
            total_pods: 3,
            utilization: 37.5,
        };
        let out = format_stats(&stats);
        assert!(out.contains("Nodes:        2"));
        assert!(out.contains("37.50%"));
    }

    #[test]
    fn test_format_logs() {
        assert_eq!(format_logs(&[]), "No events.\n");
        assert_eq!(format_logs(&["a".to_string(), "b".to_string()]), "a\nb\n");
    }
}
