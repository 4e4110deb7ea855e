pub fn default_bind_host() -> String {
    "127.0.0.1".into()
}

pub fn default_sshd_port() -> u16 {
    22222
}

pub fn default_ssh_timeout() -> u64 {
    15
}

pub fn default_client_alive_interval() -> u64 {
    60
}

pub fn default_retry_alive_count_max() -> u32 {
    3
}

pub fn default_max_try_login() -> u32 {
    5
}

pub fn default_login_block_time() -> u64 {
    10
}

pub fn default_otp_duration() -> u64 {
    90
}
