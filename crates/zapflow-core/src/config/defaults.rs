//! Default value functions used by serde for config deserialization.

pub fn default_name() -> String {
    "zapflow".to_string()
}

pub fn default_data_dir() -> String {
    "~/.zapflow".to_string()
}

pub fn default_instance_id() -> String {
    "default".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_provider() -> String {
    "openai".to_string()
}

pub fn default_true() -> bool {
    true
}

pub fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}

pub fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

pub fn default_gemini_model() -> String {
    "gemini-2.0-flash".to_string()
}

pub fn default_db_path() -> String {
    "~/.zapflow/data/zapflow.db".to_string()
}

pub fn default_poll_interval() -> u64 {
    30
}

pub fn default_batch_size() -> u32 {
    20
}

pub fn default_aggregator_delay() -> i64 {
    8
}

pub fn default_segment_delimiter() -> char {
    '#'
}

pub fn default_instructions_separator() -> String {
    "[[INSTRUCOES]]".to_string()
}

pub fn default_apologies() -> Vec<String> {
    vec![
        "Desculpe, tive um problema para responder agora. Pode repetir?".to_string(),
        "Opa, algo deu errado do meu lado. Pode mandar de novo?".to_string(),
        "Perdão, não consegui processar sua mensagem. Tenta mais uma vez?".to_string(),
    ]
}

pub fn default_asset_root() -> String {
    "~/.zapflow/public".to_string()
}

pub fn default_boomerang_prompt() -> String {
    "Continue o atendimento a partir do ponto em que parou.".to_string()
}

pub fn default_boomerang_note() -> String {
    "Só um instante, já te retorno.".to_string()
}

pub fn default_fetch_max_chars() -> usize {
    4000
}

pub fn default_dedup_capacity() -> usize {
    200
}

pub fn default_dedup_ttl() -> u64 {
    600
}

pub fn default_timezone_offset() -> i64 {
    -3
}

pub fn default_work_start() -> String {
    "09:00".to_string()
}

pub fn default_work_end() -> String {
    "18:00".to_string()
}

pub fn default_work_days() -> Vec<u32> {
    vec![1, 2, 3, 4, 5]
}

pub fn default_slot_minutes() -> u32 {
    30
}

pub fn default_mail_from() -> String {
    "no-reply@zapflow.local".to_string()
}

pub fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_api_port() -> u16 {
    3900
}
