/// OpenAI's list-models endpoint takes no query parameters or body.
#[derive(Debug, Clone, Default)]
pub struct ListModelsRequest;
