//! Prompt templates

/// Ask for a corrected manifest, and nothing else
pub fn correction_prompt(kind: &str, manifest: &str, failures: &str, details: &str) -> String {
    format!(
        "Given the following Kubernetes {kind} YAML and issues:\n\
         \n\
         Current YAML:\n\
         {manifest}\n\
         \n\
         Issues Detected:\n\
         {failures}\n\
         Analysis Details:\n\
         {details}\n\
         \n\
         Please only provide the corrected YAML.\n\
         Do not include any explanation, prose or triple backticks.\n\
         Format the response as valid Kubernetes YAML."
    )
}

/// Ask for a short explanation of a failure and how to fix it
pub fn explanation_prompt(failures: &str, language: &str) -> String {
    format!(
        "Simplify the following Kubernetes error message delimited by triple dashes, \
         written in {language}.\n\
         --- {failures} ---\n\
         Give the most likely solution step by step in no more than 280 characters. \
         Answer in this format:\n\
         Error: {{explanation}}\n\
         Solution: {{steps}}"
    )
}
