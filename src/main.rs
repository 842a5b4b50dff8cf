use procflow::cli::{init_logging, internal_error, run};
use procflow::error::WorkflowError;

fn main() {
    init_logging();

    if let Err(e) = run() {
        let workflow = e.chain().find_map(|cause| cause.downcast_ref::<WorkflowError>());
        let storage = e.chain().any(|cause| cause.downcast_ref::<rusqlite::Error>().is_some());

        match workflow {
            Some(err) if err.is_user_error() => {
                eprintln!("Error: {}", err);
                std::process::exit(1);
            }
            _ if storage || workflow.is_some() => {
                // Show error chain if available
                let mut message = e.to_string();
                let causes: Vec<String> = e.chain().skip(1).map(|c| c.to_string()).collect();
                if !causes.is_empty() {
                    message.push_str("\n\nCaused by:");
                    for (indent, cause) in causes.iter().enumerate() {
                        message.push_str(&format!("\n{:indent$}  {}", "", cause, indent = indent));
                    }
                }
                internal_error(&message);
            }
            _ => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
