/// Builds the image-generation instruction from the user's prompt and the two
/// vision descriptions. Pure: identical inputs give identical output.
pub fn compose_toy_prompt(user_prompt: &str, person_description: &str, style_description: &str) -> String {
    format!(
        "{user_prompt}. The main character of the figure should be based on a person with these features: **({person_description})**. The overall artistic look and feel of the toy should match this style: **({style_description})**."
    )
}

/// Collapses a model answer to one trimmed line.
pub fn single_line(text: &str) -> String {
    text.trim().replace("\r\n", " ").replace('\n', " ")
}
