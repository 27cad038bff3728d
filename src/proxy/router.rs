//! 账户路由
//! 按配置策略为每个请求挑选账户

use crate::core::models::{Account, AccountStore, RoutingStrategy, REFRESH_BUFFER_MS};

/// 账户路由器。无内部可变状态，并发下无需同步。
pub struct AccountRouter {
    strategy: RoutingStrategy,
}

impl AccountRouter {
    pub fn new(strategy: RoutingStrategy) -> Self {
        Self { strategy }
    }

    pub fn strategy(&self) -> RoutingStrategy {
        self.strategy
    }

    /// 选择账户。零个启用账户时返回 None, 这是正常结果, 由上层转成 401。
    pub fn select<'a>(&self, store: &'a AccountStore) -> Option<&'a Account> {
        match self.strategy {
            RoutingStrategy::Default => self.select_default(store),
            RoutingStrategy::RoundRobin => self.select_round_robin(store),
        }
    }

    fn select_default<'a>(&self, store: &'a AccountStore) -> Option<&'a Account> {
        if let Some(id) = &store.default_account_id {
            if let Some(account) = store.accounts.get(id) {
                if account.enabled {
                    return Some(account);
                }
            }
        }
        // 默认账户缺失或被禁用：退回第一个启用账户（遍历顺序任意）
        store.accounts.values().find(|a| a.enabled)
    }

    /// 无游标轮询：取 last_used 最旧的启用且未过期账户，从未使用的最优先。
    /// 用 LRU 近似公平轮换，省掉共享游标。
    fn select_round_robin<'a>(&self, store: &'a AccountStore) -> Option<&'a Account> {
        let candidate = store
            .accounts
            .values()
            .filter(|a| a.enabled && !a.credentials.is_expired(REFRESH_BUFFER_MS))
            .min_by_key(|a| a.last_used.unwrap_or(i64::MIN));
        if candidate.is_some() {
            return candidate;
        }
        // 没有直接可用的账户：退回任何持有 refresh_token 的启用账户，给刷新一个机会
        store
            .accounts
            .values()
            .find(|a| a.enabled && a.credentials.refresh_token.is_some())
    }
}
