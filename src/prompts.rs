//! Prompt builders for every call made to the text-generation service.
//!
//! Each prompt embeds the authoritative column inventory. Table
//! descriptions are never used as evidence that data exists.

use crate::config::DemoBrief;
use crate::generator::GenerationRequest;
use crate::question::Question;
use crate::schema::{ColumnKind, SchemaContext};
use itertools::Itertools;

const RULE: &str = "================================================================================";

/// Full column inventory: types, cardinalities, examples, ranges.
pub fn column_inventory(schema: &SchemaContext) -> String {
    let mut out = String::new();
    for (idx, table) in schema.tables.iter().enumerate() {
        out.push_str(&format!("\nTable {}: {}\n", idx + 1, table.name));
        out.push_str(&format!("Row Count: {}\n", table.row_count));
        out.push_str("Columns:\n");
        for col in &table.columns {
            if col.description.is_empty() {
                out.push_str(&format!("  • {} ({})\n", col.name, col.data_type));
            } else {
                out.push_str(&format!("  • {} ({}): {}\n", col.name, col.data_type, col.description));
            }
            if let Some(unique) = col.unique_count {
                out.push_str(&format!("    - Unique values: {}\n", unique));
            }
            let samples = col.sample_strings(5);
            if !samples.is_empty() {
                out.push_str(&format!("    - Examples: {}\n", samples.join(", ")));
            }
            if let Some(range) = col.numeric_range {
                match range.avg {
                    Some(avg) => {
                        out.push_str(&format!(
                            "    - Range: {} to {} (avg: {:.2})\n",
                            range.min, range.max, avg
                        ));
                    }
                    None => {
                        out.push_str(&format!("    - Range: {} to {}\n", range.min, range.max));
                    }
                }
            }
        }
    }
    out
}

/// Metrics / dimensions / time columns, grouped for question templates.
pub fn column_guide(schema: &SchemaContext) -> String {
    let columns_of = |kind: ColumnKind| {
        schema
            .tables
            .iter()
            .flat_map(|t| {
                t.columns
                    .iter()
                    .filter(move |c| c.kind() == kind && !c.name.ends_with("_ID"))
                    .map(move |c| format!("{}.{}", t.name, c.name))
            })
            .collect::<Vec<_>>()
    };

    let mut out = String::from("COLUMN GUIDE\n");
    for (label, kind) in [
        ("Metrics (aggregate these)", ColumnKind::Metric),
        ("Dimensions (group or filter by these)", ColumnKind::Dimension),
        ("Time columns (trend over these)", ColumnKind::Time),
    ] {
        let names = columns_of(kind);
        if names.is_empty() {
            continue;
        }
        out.push_str(&format!("- {}: {}\n", label, names.join(", ")));
    }
    out.push_str(
        "Use ACTUAL column names from this guide instead of generic business terms.\n\
         Do not ask about popularity, seasonality or satisfaction unless such a column is listed.\n",
    );
    out
}

fn synonym_section(schema: &SchemaContext, heading: &str) -> String {
    let synonyms = schema.valid_synonyms();
    if synonyms.is_empty() {
        return String::new();
    }
    let mut out = format!("\n{}\n{}\n{}\n", RULE, heading, RULE);
    for (column, terms) in &synonyms {
        out.push_str(&format!("  {}: {}\n", column, terms.join(", ")));
    }
    out.push_str("Only these terms or exact column names map to columns.\n");
    out
}

fn unstructured_section(schema: &SchemaContext) -> String {
    if schema.unstructured.is_empty() {
        return String::new();
    }
    let mut out = format!("\n{}\nUNSTRUCTURED DATA (FOR SEARCH QUESTIONS)\n{}\n", RULE, RULE);
    for source in &schema.unstructured {
        out.push_str(&format!(
            "📄 {} (content type: {})\n",
            source.table,
            source.content_type.as_deref().unwrap_or("unknown")
        ));
        if source.sample_chunks.is_empty() {
            out.push_str("   (No sample content available)\n");
        }
        for (i, chunk) in source.sample_chunks.iter().take(2).enumerate() {
            let preview: String = chunk.chars().take(200).collect();
            let ellipsis = if chunk.chars().count() > 200 { "..." } else { "" };
            out.push_str(&format!("   {}. {}{}\n", i + 1, preview.replace('\n', " "), ellipsis));
        }
    }
    out.push_str(
        "Search questions MUST match the content visible in these samples, not the content type label.\n\
         Keep search questions as general as the samples are.\n",
    );
    out
}

fn denylist_section(existing: &[String]) -> String {
    if existing.is_empty() {
        return String::new();
    }
    let listed = existing
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text))
        .join("\n");
    format!(
        "\nEXISTING QUESTIONS - DO NOT DUPLICATE:\n{}\n\
         Your new questions must be DISTINCT from the above: use different metrics, \
         aggregations and groupings.\n",
        listed
    )
}

const CONSERVATIVE_RULES: &str = "
CONSERVATIVE MODE (previous questions failed validation):
1. ONLY use columns you can DIRECTLY SEE in the inventory above
2. PREFER raw-column aggregates (COUNT, AVERAGE, SUM) over derived metrics
3. NO growth rates, percentages, ratios or conversion rates unless a column for that metric exists
4. Use \"top 5\" at most, and never N at or above a column's unique count
5. No year-over-year or multi-period comparisons
6. Still produce ADVANCED questions using safe patterns:
   - How does [metric1] correlate with [metric2] across [dimension]?
   - Compare [metric] between [value A] and [value B] of [dimension]
   - What patterns emerge in [metric] by [dimension1] and [dimension2]?
";

const OUTPUT_FORMAT: &str = r#"
Return ONLY a JSON array in this exact format:
[
  {
    "text": "What are the top 3 regions by total revenue?",
    "difficulty": "basic",
    "category": "analytics",
    "referenced_columns": ["REGION", "REVENUE"],
    "referenced_tables": ["FACT_SALES"]
  },
  {
    "text": "Find documentation about operational processes",
    "difficulty": "basic",
    "category": "search",
    "referenced_columns": [],
    "referenced_tables": ["DOCUMENTATION_CHUNKS"]
  }
]
Every question MUST include referenced_columns (actual column names used) and referenced_tables."#;

/// Prompt asking for a batch of candidate questions.
pub fn generation_prompt(
    schema: &SchemaContext,
    brief: &DemoBrief,
    request: &GenerationRequest<'_>,
) -> String {
    let (analytics, search) = request.category_split();

    let mut prompt = format!(
        "Generate {} natural language questions for a {} data analysis demo.\n\n\
         Context:\n- Company: {}\n- Demo: {}\n- Business Focus: {}\n- Language: {}\n",
        request.count, brief.industry, brief.company_name, brief.title, brief.business_value, brief.language
    );

    prompt.push_str(&format!("\n{}\nAVAILABLE DATA (COMPLETE CONTEXT)\n{}", RULE, RULE));
    prompt.push_str(&column_inventory(schema));
    prompt.push('\n');
    prompt.push_str(&column_guide(schema));
    prompt.push_str(&unstructured_section(schema));
    prompt.push_str(&synonym_section(schema, "SEMANTIC MODEL VOCABULARY"));
    prompt.push_str(&denylist_section(request.existing));
    if request.conservative {
        prompt.push_str(CONSERVATIVE_RULES);
    }

    prompt.push_str(
        "\nRULES:\n\
         1. Every column a question needs MUST appear in the inventory above\n\
         2. When a column has N unique values, never ask for \"top M\" with M >= N\n\
         3. Respect the numeric ranges shown\n\
         4. Avoid calculated metrics (growth rate, percentage, ratio) unless a column holds them\n\
         5. Search questions start with Find, Search for, Locate, Look for or Retrieve and target unstructured content\n",
    );

    prompt.push_str(&format!(
        "\nDISTRIBUTION:\n- {} questions with \"category\": \"analytics\"\n- {} questions with \"category\": \"search\"\n\
         - Mix difficulties: basic, intermediate and advanced\n",
        analytics, search
    ));
    if request.hints.advanced_analytics > 0 {
        prompt.push_str(&format!(
            "- REQUIRED: at least {} ADVANCED analytics questions (multi-column analysis, correlations, comparisons)\n",
            request.hints.advanced_analytics
        ));
    }
    if request.hints.search > 0 {
        prompt.push_str(&format!(
            "- REQUIRED: at least {} SEARCH questions over the unstructured content\n",
            request.hints.search
        ));
    }

    prompt.push_str(OUTPUT_FORMAT);
    prompt
}

/// Batched answerability check. Numbers in the verdict are 1-indexed into `questions`.
pub fn validation_prompt(schema: &SchemaContext, questions: &[&Question]) -> String {
    let numbered = questions
        .iter()
        .enumerate()
        .map(|(i, q)| format!("{}. {}", i + 1, q.text))
        .join("\n");

    let mut prompt = format!(
        "STRICT VALIDATION - reject any question that cannot be answered from these columns.\n\n\
         ACTUAL COLUMNS (SOURCE OF TRUTH):{}",
        column_inventory(schema)
    );
    prompt.push_str(&synonym_section(schema, "NATURAL LANGUAGE MAPPINGS"));
    prompt.push_str(&format!(
        "\nQUESTIONS TO VALIDATE:\n{}\n\n\
         VALIDATION RULES:\n\
         1. REJECT if a question references any concept not present as a column or mapped synonym\n\
         2. REJECT derived metrics (growth, percentage, ratio, per-unit) without supporting columns\n\
         3. REJECT \"top N\" where N >= the grouping column's unique count\n\
         4. REJECT time-based analysis without a DATE or TIMESTAMP column\n\
         5. REJECT numeric aggregation on non-numeric columns\n\
         6. When in doubt, REJECT\n\n\
         Return ONLY a JSON object, no explanation and no markdown:\n\
         {{\"valid_question_numbers\": [1, 3, 5]}}\n",
        numbered
    ));
    prompt
}

/// Closed yes/no question for the deployed query layer.
pub fn semantic_prompt(model_id: &str, question: &str) -> String {
    format!(
        "Given this semantic model view: {}, can you generate SQL to answer: \"{}\"? \
         Respond with just YES or NO.",
        model_id, question
    )
}

pub fn follow_up_prompt(question: &str) -> String {
    format!(
        "Given this analytical question: \"{}\"\n\n\
         Generate 2-3 natural follow-up questions that build on its insights, \
         explore the why behind patterns and suggest next steps.\n\n\
         Return ONLY a JSON list of question strings:\n\
         [\"follow-up question 1\", \"follow-up question 2\"]\n",
        question
    )
}
