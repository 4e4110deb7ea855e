//! First-run bootstrap (spec.md SPEC_FULL.md §4.13), mirroring this
//! codebase's `setup` command: not a migration system, just enough
//! default data to evaluate or integration-test the bastion locally.

use bastion_common::helpers::hash::hash_password;
use bastion_common::helpers::rng::get_crypto_rng;
use bastion_common::model::{Asset, AssetUserInfo, Role, SystemUser, User, UserSecret};
use rand::Rng;
use uuid::Uuid;

use crate::Store;

pub struct SeedResult {
    pub admin_username: String,
    pub admin_password: String,
}

pub fn seed_demo_data(store: &Store) -> anyhow::Result<SeedResult> {
    let admin_password: String = {
        let mut rng = get_crypto_rng();
        (0..16)
            .map(|_| {
                const CHARS: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";
                CHARS[rng.gen_range(0..CHARS.len())] as char
            })
            .collect()
    };

    let admin = User {
        id: Uuid::new_v4(),
        username: "admin".into(),
        role: Role::Admin,
        expire_at: 0,
        otp_level: 0,
        is_active: true,
        node_ids: vec![],
        addr_allow_list: vec![],
    };
    store.put_user(&admin)?;
    store.put_user_secret(&UserSecret {
        user_id: admin.id,
        password_hash: hash_password(&admin_password)?,
        authorized_keys: vec![],
    })?;

    let demo_users: Vec<User> = ["alice", "bob"]
        .iter()
        .map(|name| User {
            id: Uuid::new_v4(),
            username: (*name).into(),
            role: Role::User,
            expire_at: 0,
            otp_level: 0,
            is_active: true,
            node_ids: vec![],
            addr_allow_list: vec![],
        })
        .collect();
    for user in &demo_users {
        store.put_user(user)?;
        store.put_user_secret(&UserSecret {
            user_id: user.id,
            password_hash: hash_password("demo-password")?,
            authorized_keys: vec![],
        })?;
    }

    let demo_assets: Vec<Asset> = [("web1", "10.0.0.11"), ("web2", "10.0.0.12"), ("db1", "10.0.0.21")]
        .iter()
        .map(|(name, ip)| Asset {
            id: Uuid::new_v4(),
            name: (*name).into(),
            hostname: format!("{name}.internal"),
            ip: ip.parse().expect("demo IP literal must parse"),
            protocols: vec!["ssh/22".into()],
            platform: "Linux".into(),
            is_active: true,
        })
        .collect();
    for asset in &demo_assets {
        store.put_asset(asset)?;
    }

    let demo_sys_users: Vec<SystemUser> = [("root", 0), ("deploy", 1)]
        .iter()
        .map(|(name, priority)| SystemUser {
            id: Uuid::new_v4(),
            username: (*name).into(),
            priority: *priority,
            protocol: "ssh".into(),
            password: Some("demo-password".into()),
            private_key: None,
            passphrase: None,
            comment: "seeded demo system user".into(),
        })
        .collect();
    for sys_user in &demo_sys_users {
        store.put_system_user(sys_user)?;
    }

    // alice -> web1 via root, no confirmation required.
    store.put_permission(&AssetUserInfo {
        id: Uuid::new_v4(),
        user_id: demo_users[0].id,
        asset_id: demo_assets[0].id,
        expire_at: 0,
        sys_user_ids: vec![demo_sys_users[0].id],
        need_confirm: false,
    })?;

    // bob -> db1 via deploy, requires ticket confirmation: exercises C3.
    store.put_permission(&AssetUserInfo {
        id: Uuid::new_v4(),
        user_id: demo_users[1].id,
        asset_id: demo_assets[2].id,
        expire_at: 0,
        sys_user_ids: vec![demo_sys_users[1].id],
        need_confirm: true,
    })?;

    Ok(SeedResult {
        admin_username: admin.username,
        admin_password,
    })
}
