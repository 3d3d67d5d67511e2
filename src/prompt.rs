use crate::conversation::Source;

pub const PERSONA: &str = "Your name is Layla, I was created by Omar Radwan, the Social Media Marketing and Web Developer for the NCTU Petroleum Tech team, at New Cairo Technological University (NCTU). NCTU Petroleum Tech is the first student chapter of its kind at the university, founded in June 2024 by students in the Production, Processing, and Transport of Petroleum Department. It's a non-profit focused on skill development, knowledge sharing, career guidance, and helping students reach their goals. Their mission is to develop and promote technical knowledge in oil and gas exploration and production, fostering communication among petroleum engineers globally. Their vision is to empower the oil and gas community to meet world energy needs safely, securely, and sustainably.";

const RESPONSE_GUIDELINES: &str = "Response Guidelines:
• Use MAIN HEADINGS in caps followed by colon (e.g., \"KEY FEATURES:\")
• Place each heading and subheading on its own line
• Use subheadings with normal case followed by colon
• Use bullet points (•) for lists
• Keep paragraphs short and focused
• Add clear spacing between sections
• Highlight **key terms** in bold

Example Format:
MAIN HEADING:
This is an introduction paragraph.

Subheading:
• First bullet point
• Second bullet point

ANOTHER HEADING:
More content here.";

pub struct Suggestion {
    pub title: &'static str,
    pub description: &'static str,
    pub question: &'static str,
}

/// Starter prompts shown on an empty conversation.
pub const SUGGESTED_QUESTIONS: [Suggestion; 4] = [
    Suggestion {
        title: "Image Generation",
        description: "Create stunning images from text descriptions",
        question: "Generate an image of a mountain landscape at sunset",
    },
    Suggestion {
        title: "Creative Writing",
        description: "Get help with copywriting and content creation",
        question: "Write an engaging ad copy for a new fitness app",
    },
    Suggestion {
        title: "Q&A Assistant",
        description: "Get answers to your questions instantly",
        question: "Explain how blockchain technology works",
    },
    Suggestion {
        title: "Content Summary",
        description: "Summarize any text into key points",
        question: "Summarize this article into main points",
    },
];

/// Reference block listing each source, empty when there are none.
pub fn search_context(sources: &[Source]) -> String {
    if sources.is_empty() {
        return String::new();
    }

    let mut context = String::from("Based on these search results:\n\nReference Materials:\n");
    for (i, source) in sources.iter().enumerate() {
        context.push_str(&format!(
            "\n{}. {}\n   • Source: {}\n   • Summary: {}\n",
            i + 1,
            source.title,
            source.link,
            source.snippet
        ));
    }
    context.push_str("\nPlease provide a comprehensive answer using the specified format below:\n\n");
    context
}

/// Full prompt sent to the model for one user turn.
pub fn compose(user_prompt: &str, sources: &[Source]) -> String {
    format!(
        "{}\n\n{}Please provide a well-organized response following this structure:\n\n{}\n\n{}",
        PERSONA,
        search_context(sources),
        user_prompt,
        RESPONSE_GUIDELINES
    )
}

/// Prompt asking the model to act as a search engine.
pub fn search_request(query: &str, max_sources: usize) -> String {
    format!(
        "Search query: \"{}\"
Please provide {} relevant sources with accurate information about this topic.
Format the response as a JSON array with objects containing:
- title: The title of the source
- url: The URL of the source
- description: A brief description of the content
- imageUrl (optional): URL of a relevant image if available

Focus on reliable sources like industry reports, academic papers, and official websites.",
        query, max_sources
    )
}
