/// Each SSE chunk of a streamed generateContent call has the same shape as
/// the non-streamed response, just partial (one or more candidates' deltas).
pub type StreamGenerateContentResponse = crate::gemini::generate_content::response::GenerateContentResponse;
