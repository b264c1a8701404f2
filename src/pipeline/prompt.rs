//! Extraction prompt sent with every page screenshot.

/// Instruction asking the model for a `{"profiles": [...]}` envelope using
/// the `ProfileRecord` field names. Institution and page number are NOT
/// requested — the pipeline injects those from context.
pub const EXTRACTION_PROMPT: &str = "\
This is a screenshot of a people-search results page. Identify every \
profile visible in the image. For each profile extract:\n\
1. Full name\n\
2. Job title\n\
3. Company/Organization\n\
4. Location\n\
5. Education details (if visible)\n\
6. Connections (if visible, e.g. \"500+\")\n\n\
Respond with a JSON object of the form {\"profiles\": [...]} where each \
element has the fields: name, job_title, company, location, education, \
connections. Use null for anything not visible. Only include profiles \
where the name is clearly readable. Return pure JSON, no markdown.";
